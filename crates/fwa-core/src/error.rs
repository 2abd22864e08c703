//! Error types for the policy model.

use thiserror::Error;

/// Errors raised while parsing model values from text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown network path capability: {0}")]
    UnknownCapability(String),

    #[error("invalid subject id: {0}")]
    InvalidSubject(String),

    #[error("malformed policy signature: {0}")]
    MalformedSignature(String),
}
