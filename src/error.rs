//! Error types for peercache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by cache groups and their collaborators.
///
/// `Error` is `Clone` because a single fill outcome is handed to every
/// caller coalesced onto the same in-flight load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The loader determined the key has no value
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// Remote peer unreachable or returned an unrecoverable error
    #[error("Transport failure talking to peer {peer}: {reason}")]
    TransportFailure { peer: String, reason: String },

    /// The caller's cancellation signal or timeout fired
    #[error("Request cancelled")]
    Cancelled,

    /// The loader failed for a reason other than not-found
    #[error("Loader failed for key {key}: {reason}")]
    LoaderFailure { key: String, reason: String },

    /// No group registered under this name
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`Error`] without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    TransportFailure,
    Cancelled,
    LoaderFailure,
    GroupNotFound,
    Config,
    Internal,
}

impl Error {
    /// Build a transport failure for `peer`.
    pub fn transport(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::TransportFailure {
            peer: peer.into(),
            reason: reason.into(),
        }
    }

    /// Build a not-found error for `key`.
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::TransportFailure { .. } => ErrorKind::TransportFailure,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::LoaderFailure { .. } => ErrorKind::LoaderFailure,
            Error::GroupNotFound(_) => ErrorKind::GroupNotFound,
            Error::Config(_) => ErrorKind::Config,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<crate::coalesce::Cancelled> for Error {
    fn from(_: crate::coalesce::Cancelled) -> Self {
        Error::Cancelled
    }
}
