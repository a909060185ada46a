//! Error types for the Tether engine.

use thiserror::Error;

/// Failure to coerce a raw payload into a [`Record`](crate::Record).
///
/// Every variant carries the offending payload serialized as JSON so the
/// failure can be diagnosed without access to the original value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoerceError {
    #[error("incorrect object type: expected {expected}, found {found}; payload = '{payload}'")]
    IncorrectObjectType {
        expected: String,
        found: String,
        payload: String,
    },

    #[error("missing required properties: {}; payload = '{payload}'", keys.join(", "))]
    MissingRequiredProperties { keys: Vec<String>, payload: String },

    #[error("invalid value for '{key}': {allowed}; payload = '{payload}'")]
    InvalidPropertyValue {
        key: String,
        allowed: String,
        payload: String,
    },
}

impl CoerceError {
    /// The serialized payload that failed to coerce.
    pub fn payload(&self) -> &str {
        match self {
            CoerceError::IncorrectObjectType { payload, .. }
            | CoerceError::MissingRequiredProperties { payload, .. }
            | CoerceError::InvalidPropertyValue { payload, .. } => payload,
        }
    }
}

/// Result type for coercion.
pub type Result<T> = std::result::Result<T, CoerceError>;
