//! Error types for the Tether engine.

use thiserror::Error;

/// All possible errors from the Tether engine.
///
/// Every variant is raised during validation or planning, before any
/// network activity takes place.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A field key violates the key syntax (`^[a-z0-9][a-z0-9_]*$` for the
    /// first path segment, no empty segments).
    #[error("malformed key: '{0}'")]
    MalformedKey(String),

    /// An operation payload is incompatible with its kind, or an operation
    /// kind is outside the valid set of the field's reducer.
    #[error("invalid type for field '{field}': expected {expected}, got {got}")]
    InvalidType {
        field: String,
        expected: String,
        got: String,
    },

    /// The record graph or call arguments are internally inconsistent:
    /// mixed execution contexts, a circular newborn dependency, or a failed
    /// pre-save validation hook.
    #[error("inconsistent state: {0}")]
    Inconsistency(String),

    /// A record or a nested path segment could not be addressed.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::MalformedKey("9 lives".into());
        assert_eq!(err.to_string(), "malformed key: '9 lives'");

        let err = Error::InvalidType {
            field: "score".into(),
            expected: "number".into(),
            got: "string".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid type for field 'score': expected number, got string"
        );

        let err = Error::Inconsistency("circular newborn dependency".into());
        assert_eq!(
            err.to_string(),
            "inconsistent state: circular newborn dependency"
        );
    }
}
