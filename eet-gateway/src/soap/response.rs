//! The registry's answer to a sale submission (`Odpoved`).

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::EET_NS;
use crate::xml::Element;

/// Errors while reading an `Odpoved` element.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// A required element is absent.
    #[error("Odpoved has no {0} element")]
    MissingElement(&'static str),

    /// Both or neither of `Potvrzeni` and `Chyba` are present.
    #[error("Odpoved must carry exactly one of Potvrzeni and Chyba")]
    Ambiguous,

    /// An attribute is missing or has the wrong format.
    #[error("invalid attribute {element}/@{attribute}: {reason}")]
    InvalidAttribute {
        /// Element carrying the attribute.
        element: &'static str,
        /// Attribute name.
        attribute: &'static str,
        /// What went wrong.
        reason: String,
    },
}

/// Parsed registry response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    /// Response header.
    pub header: ResponseHeader,
    /// Present when the sale was accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<Confirmation>,
    /// Present when the sale was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Rejection>,
    /// Non-fatal findings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// `Odpoved/Hlavicka`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseHeader {
    /// Echo of the request's message UUID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid_zpravy: Option<Uuid>,
    /// Echo of the request's fingerprint code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bkp: Option<String>,
    /// Time of acceptance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dat_prij: Option<DateTime<FixedOffset>>,
    /// Time of rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dat_odmit: Option<DateTime<FixedOffset>>,
}

/// `Odpoved/Potvrzeni`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    /// Fiscal identification code assigned by the registry.
    pub fik: String,
    /// `true` when answered by the playground.
    pub test: bool,
}

/// `Odpoved/Chyba`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Registry error code.
    pub kod: i32,
    /// Human-readable message.
    pub message: String,
    /// `true` when answered by the playground.
    pub test: bool,
}

/// `Odpoved/Varovani`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    /// Warning code.
    pub kod_varov: i32,
    /// Human-readable message.
    pub message: String,
}

impl Response {
    /// Reads an `Odpoved` element.
    pub fn from_element(odpoved: &Element) -> Result<Self, ResponseError> {
        let (_, hlavicka) =
            odpoved.child(EET_NS, "Hlavicka").ok_or(ResponseError::MissingElement("Hlavicka"))?;
        let header = ResponseHeader {
            uuid_zpravy: parse_opt(hlavicka, "Hlavicka", "uuid_zpravy", Uuid::parse_str)?,
            bkp: hlavicka.attribute("bkp").map(str::to_owned),
            dat_prij: parse_opt(hlavicka, "Hlavicka", "dat_prij", DateTime::parse_from_rfc3339)?,
            dat_odmit: parse_opt(hlavicka, "Hlavicka", "dat_odmit", DateTime::parse_from_rfc3339)?,
        };

        let confirmation = odpoved
            .child(EET_NS, "Potvrzeni")
            .map(|(_, el)| {
                Ok::<_, ResponseError>(Confirmation {
                    fik: required(el, "Potvrzeni", "fik")?.to_owned(),
                    test: parse_test(el, "Potvrzeni")?,
                })
            })
            .transpose()?;

        let error = odpoved
            .child(EET_NS, "Chyba")
            .map(|(_, el)| {
                Ok::<_, ResponseError>(Rejection {
                    kod: parse_required(el, "Chyba", "kod")?,
                    message: el.text(),
                    test: parse_test(el, "Chyba")?,
                })
            })
            .transpose()?;

        if confirmation.is_some() == error.is_some() {
            return Err(ResponseError::Ambiguous);
        }

        let warnings = odpoved
            .children_named(EET_NS, "Varovani")
            .map(|el| {
                Ok(Warning { kod_varov: parse_required(el, "Varovani", "kod_varov")?, message: el.text() })
            })
            .collect::<Result<Vec<_>, ResponseError>>()?;

        Ok(Self { header, confirmation, error, warnings })
    }

    /// Fiscal identification code, when the sale was accepted.
    #[must_use]
    pub fn fik(&self) -> Option<&str> {
        self.confirmation.as_ref().map(|c| c.fik.as_str())
    }

    /// Whether the answer came from the playground environment.
    #[must_use]
    pub fn is_test(&self) -> bool {
        match (&self.confirmation, &self.error) {
            (Some(c), _) => c.test,
            (None, Some(e)) => e.test,
            (None, None) => false,
        }
    }
}

fn required<'a>(el: &'a Element, element: &'static str, attribute: &'static str) -> Result<&'a str, ResponseError> {
    el.attribute(attribute).ok_or_else(|| ResponseError::InvalidAttribute {
        element,
        attribute,
        reason: "missing".to_owned(),
    })
}

fn parse_required<T>(el: &Element, element: &'static str, attribute: &'static str) -> Result<T, ResponseError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    required(el, element, attribute)?.trim().parse().map_err(|e: T::Err| {
        ResponseError::InvalidAttribute { element, attribute, reason: e.to_string() }
    })
}

fn parse_opt<T, E: std::fmt::Display>(
    el: &Element,
    element: &'static str,
    attribute: &'static str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<Option<T>, ResponseError> {
    el.attribute(attribute)
        .map(|value| {
            parse(value.trim()).map_err(|e| ResponseError::InvalidAttribute {
                element,
                attribute,
                reason: e.to_string(),
            })
        })
        .transpose()
}

// `test` is optional and defaults to false.
fn parse_test(el: &Element, element: &'static str) -> Result<bool, ResponseError> {
    match el.attribute("test").map(str::trim) {
        None | Some("false" | "0") => Ok(false),
        Some("true" | "1") => Ok(true),
        Some(other) => Err(ResponseError::InvalidAttribute {
            element,
            attribute: "test",
            reason: format!("not a boolean: {other}"),
        }),
    }
}
