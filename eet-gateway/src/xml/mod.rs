//! XML tree and exclusive canonicalization for XML-DSig.

pub mod c14n;
pub mod dom;

pub use c14n::canonicalize;
pub use dom::{Document, Element, ElementPath, Node};
use thiserror::Error;

/// Errors raised while parsing or canonicalising XML.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    /// The input is not well-formed.
    #[error("malformed XML: {0}")]
    Malformed(String),

    /// The input has no document element.
    #[error("document is empty")]
    Empty,

    /// Document type declarations are not accepted.
    #[error("DOCTYPE is not allowed")]
    DocType,

    /// A prefix is used without a declaration in scope.
    #[error("namespace prefix is not bound: {0:?}")]
    UnboundPrefix(String),

    /// An element path does not address an element.
    #[error("no element at path {0:?}")]
    InvalidPath(Vec<usize>),
}
