//! The sale receipt submitted to the registry.
//!
//! A [`Sale`] mirrors the `Trzba` element of the EET v3 schema. Field names are
//! the wire attribute names so that the JSON accepted over REST and the XML sent
//! to the authority use the same vocabulary.
//!
//! # Examples
//!
//! ```
//! use eet_gateway::sale::Sale;
//!
//! let sale: Sale = serde_json::from_str(
//!     r#"{
//!         "uuid_zpravy": "a1b2c3d4-0000-4000-8000-000000000001",
//!         "prvni_zaslani": true,
//!         "dic_popl": "CZ00000019",
//!         "id_provoz": 141,
//!         "id_pokl": "1patro-vpravo",
//!         "porad_cis": "141-18543-05",
//!         "celk_trzba": "236.00"
//!     }"#,
//! )?;
//! assert!(sale.validate().is_ok());
//! # Ok::<(), serde_json::Error>(())
//! ```

pub mod codes;

use chrono::{DateTime, FixedOffset, Local, SubsecRound};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::{Uuid, Variant};

/// Highest premises identifier the registry accepts.
pub const MAX_PREMISES_ID: u32 = 999_999;

const REGISTER_ID_MAX_LEN: usize = 20;
const SERIAL_MAX_LEN: usize = 25;

/// Taxation regime of the sale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Regime {
    /// Standard regime (`0`).
    #[default]
    Standard,
    /// Simplified regime (`1`).
    Simplified,
}

impl TryFrom<u8> for Regime {
    type Error = SaleValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Standard),
            1 => Ok(Self::Simplified),
            other => Err(SaleValidationError::Regime(other)),
        }
    }
}

impl From<Regime> for u8 {
    fn from(regime: Regime) -> Self {
        match regime {
            Regime::Standard => 0,
            Regime::Simplified => 1,
        }
    }
}

/// One cash-register sale.
///
/// `pkp` and `bkp` are computed by [`codes::stamp`]; values supplied by a
/// client are overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    /// Message identifier, echoed back by the authority.
    pub uuid_zpravy: Uuid,
    /// Time the message was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dat_odesl: Option<DateTime<FixedOffset>>,
    /// `true` on the first attempt, `false` on resubmission.
    #[serde(default = "default_first_send")]
    pub prvni_zaslani: bool,
    /// Verification mode: the authority checks the message but does not record it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overeni: Option<bool>,

    /// Merchant tax identifier.
    pub dic_popl: String,
    /// Delegating tax identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dic_poverujiciho: Option<String>,
    /// Premises identifier.
    pub id_provoz: u32,
    /// Cash register identifier.
    pub id_pokl: String,
    /// Receipt serial number.
    pub porad_cis: String,
    /// Time of sale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dat_trzby: Option<DateTime<FixedOffset>>,
    /// Total amount.
    pub celk_trzba: Decimal,
    /// Amount exempt from VAT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zakl_nepodl_dph: Option<Decimal>,
    /// Tax base, standard rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zakl_dan1: Option<Decimal>,
    /// Tax, standard rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dan1: Option<Decimal>,
    /// Tax base, first reduced rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zakl_dan2: Option<Decimal>,
    /// Tax, first reduced rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dan2: Option<Decimal>,
    /// Tax base, second reduced rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zakl_dan3: Option<Decimal>,
    /// Tax, second reduced rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dan3: Option<Decimal>,
    /// Travel services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cest_sluz: Option<Decimal>,
    /// Used goods, standard rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pouzit_zboz1: Option<Decimal>,
    /// Used goods, first reduced rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pouzit_zboz2: Option<Decimal>,
    /// Used goods, second reduced rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pouzit_zboz3: Option<Decimal>,
    /// Amount intended for later drawing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urceno_cerp_zuct: Option<Decimal>,
    /// Amount drawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cerp_zuct: Option<Decimal>,
    /// Taxation regime.
    #[serde(default)]
    pub rezim: Regime,

    /// Producer signature code (raw RSA signature bytes).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub pkp: Option<Vec<u8>>,
    /// Producer fingerprint code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bkp: Option<String>,
}

const fn default_first_send() -> bool {
    true
}

/// A sale field that violates a registry constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaleValidationError {
    /// The message UUID is not an RFC 4122 version 1 to 5 UUID.
    #[error("uuid_zpravy is not an RFC 4122 UUID of version 1 to 5: {0}")]
    Uuid(Uuid),

    /// A tax identifier does not match `CZ` followed by 8 to 10 digits.
    #[error("{field} is not a valid tax identifier: {value:?}")]
    TaxId {
        /// Offending field.
        field: &'static str,
        /// Supplied value.
        value: String,
    },

    /// The delegating tax identifier equals the merchant's.
    #[error("dic_poverujiciho must differ from dic_popl")]
    SameDelegate,

    /// Premises identifier outside `1..=999999`.
    #[error("id_provoz must be within 1..={MAX_PREMISES_ID}, got {0}")]
    PremisesId(u32),

    /// Register identifier or serial number has a bad length or character.
    #[error("{field} must be 1 to {max_len} characters of [0-9a-zA-Z.,:;/#-_ ], got {value:?}")]
    Identifier {
        /// Offending field.
        field: &'static str,
        /// Maximum length in characters.
        max_len: usize,
        /// Supplied value.
        value: String,
    },

    /// Amount out of range or with more than two fractional digits.
    #[error("{field} must be within ±99999999.99 with at most two decimals, got {value}")]
    Amount {
        /// Offending field.
        field: &'static str,
        /// Supplied value.
        value: Decimal,
    },

    /// Unknown regime code.
    #[error("rezim must be 0 or 1, got {0}")]
    Regime(u8),
}

impl Sale {
    /// Checks every field constraint and reports the first violation.
    pub fn validate(&self) -> Result<(), SaleValidationError> {
        if !(1..=5).contains(&self.uuid_zpravy.get_version_num())
            || self.uuid_zpravy.get_variant() != Variant::RFC4122
        {
            return Err(SaleValidationError::Uuid(self.uuid_zpravy));
        }

        validate_tax_id("dic_popl", &self.dic_popl)?;
        if let Some(delegate) = &self.dic_poverujiciho {
            validate_tax_id("dic_poverujiciho", delegate)?;
            if delegate == &self.dic_popl {
                return Err(SaleValidationError::SameDelegate);
            }
        }

        if !(1..=MAX_PREMISES_ID).contains(&self.id_provoz) {
            return Err(SaleValidationError::PremisesId(self.id_provoz));
        }

        validate_identifier("id_pokl", &self.id_pokl, REGISTER_ID_MAX_LEN)?;
        validate_identifier("porad_cis", &self.porad_cis, SERIAL_MAX_LEN)?;

        for (field, value) in self.amounts() {
            if value.abs() > max_amount() || value.round_dp(2) != value {
                return Err(SaleValidationError::Amount { field, value });
            }
        }

        Ok(())
    }

    /// Sets `dat_odesl` and `dat_trzby` to the current local time when absent.
    pub fn fill_defaults(&mut self) {
        self.fill_defaults_at(Local::now().fixed_offset());
    }

    /// Sets absent timestamps to `now`, truncated to whole seconds.
    pub fn fill_defaults_at(&mut self, now: DateTime<FixedOffset>) {
        let now = now.trunc_subsecs(0);
        self.dat_odesl.get_or_insert(now);
        self.dat_trzby.get_or_insert(now);
    }

    /// Every amount carried by the sale, with its wire name.
    pub fn amounts(&self) -> impl Iterator<Item = (&'static str, Decimal)> + '_ {
        let optional = [
            ("zakl_nepodl_dph", self.zakl_nepodl_dph),
            ("zakl_dan1", self.zakl_dan1),
            ("dan1", self.dan1),
            ("zakl_dan2", self.zakl_dan2),
            ("dan2", self.dan2),
            ("zakl_dan3", self.zakl_dan3),
            ("dan3", self.dan3),
            ("cest_sluz", self.cest_sluz),
            ("pouzit_zboz1", self.pouzit_zboz1),
            ("pouzit_zboz2", self.pouzit_zboz2),
            ("pouzit_zboz3", self.pouzit_zboz3),
            ("urceno_cerp_zuct", self.urceno_cerp_zuct),
            ("cerp_zuct", self.cerp_zuct),
        ];
        std::iter::once(("celk_trzba", self.celk_trzba))
            .chain(optional.into_iter().filter_map(|(name, value)| value.map(|v| (name, v))))
    }
}

fn max_amount() -> Decimal {
    Decimal::new(9_999_999_999, 2)
}

fn validate_tax_id(field: &'static str, value: &str) -> Result<(), SaleValidationError> {
    let valid = value.strip_prefix("CZ").is_some_and(|digits| {
        (8..=10).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
    });
    if valid {
        Ok(())
    } else {
        Err(SaleValidationError::TaxId { field, value: value.to_owned() })
    }
}

fn validate_identifier(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), SaleValidationError> {
    let len = value.chars().count();
    let allowed =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | ',' | ':' | ';' | '/' | '#' | '-' | '_' | ' ');
    if (1..=max_len).contains(&len) && value.chars().all(allowed) {
        Ok(())
    } else {
        Err(SaleValidationError::Identifier { field, max_len, value: value.to_owned() })
    }
}

/// Renders an amount with exactly two fractional digits.
#[must_use]
pub fn format_amount(value: Decimal) -> String {
    let mut value = value.round_dp(2);
    value.rescale(2);
    value.to_string()
}

/// Renders a timestamp as `YYYY-MM-DDThh:mm:ss±hh:mm`.
#[must_use]
pub fn format_datetime(value: &DateTime<FixedOffset>) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| STANDARD.decode(text).map_err(D::Error::custom))
            .transpose()
    }
}
