//! Unified error handling for the client shell.

use crate::transport::TransportError;

/// Application-facing error type.
///
/// Validation and planning failures surface as [`Error::Engine`] before
/// any network activity; [`Error::TransportFailure`] wraps whatever the
/// transport collaborator reported, opaquely.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] tether_engine::Error),

    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    #[error("request cancelled")]
    Cancelled,
}

impl Error {
    /// True when the error is the observable outcome of a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
