//! Error types for the megacore library.

use std::fmt;

use thiserror::Error;

/// Main error type for megacore operations.
#[derive(Error, Debug)]
pub enum MegaError {
    /// Login or session validation failed.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Transient transport failure (connection, timeout, 5xx).
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP request failed with a non-retryable status code.
    #[error("HTTP error: {0}")]
    Http(u16),

    /// The service asked us to slow down and retries were exhausted.
    #[error("Rate limited by server, try again later")]
    RateLimited,

    /// MEGA API returned an error code.
    #[error("API error: {code} - {message}")]
    Service { code: i64, message: String },

    /// Path or handle does not resolve.
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// Target of a create operation already exists.
    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    /// A sibling already carries the requested name.
    #[error("Name conflict: {name:?} already exists in {parent}")]
    NameConflict { parent: String, name: String },

    /// MAC or checksum verification failed.
    #[error("Integrity check failed for {handle}{}", ChunkSuffix(*.chunk_index))]
    Integrity {
        handle: String,
        chunk_index: Option<usize>,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// A transfer failed; carries partial-progress context.
    #[error(transparent)]
    Transfer(Box<TransferError>),

    /// Operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Cryptographic operation failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Invalid or unexpected response from server.
    #[error("Invalid response from server")]
    InvalidResponse,

    /// Caller passed an argument that can never succeed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The session actor is gone.
    #[error("Session closed")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

struct ChunkSuffix(Option<usize>);

impl fmt::Display for ChunkSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(index) => write!(f, " (chunk {})", index),
            None => Ok(()),
        }
    }
}

impl MegaError {
    /// Transient failures that a chunk worker may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MegaError::Network(_) | MegaError::RateLimited)
    }

    /// Peel off transfer context and return the underlying failure.
    pub fn root_cause(&self) -> &MegaError {
        match self {
            MegaError::Transfer(t) => t.source.root_cause(),
            other => other,
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self.root_cause(), MegaError::Integrity { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), MegaError::Cancelled)
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        MegaError::NotFound { path: path.into() }
    }
}

impl From<TransferError> for MegaError {
    fn from(err: TransferError) -> Self {
        MegaError::Transfer(Box::new(err))
    }
}

/// Login failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account blocked")]
    AccountBlocked,
    #[error("network error during login: {0}")]
    Network(String),
    /// The server-side session is no longer valid.
    #[error("session expired")]
    SessionExpired,
}

/// Session blob load/save failures.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("unsupported session format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },
    #[error("not a session blob")]
    BadMagic,
    #[error("session blob is corrupt (checksum mismatch)")]
    Corrupt,
    #[error("malformed session blob: {0}")]
    Malformed(String),
    #[error("session blob is encrypted; a local key is required")]
    LocalKeyRequired,
    #[error("local key does not match this session blob")]
    WrongLocalKey,
}

/// Public link failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("malformed link: {0}")]
    Malformed(String),
    #[error("link expired")]
    Expired,
    #[error("link revoked or taken down")]
    Revoked,
}

/// Which stage of a transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    Network,
    Io,
    Integrity,
    Service,
}

impl TransferErrorKind {
    fn of(err: &MegaError) -> Self {
        match err.root_cause() {
            MegaError::Network(_) | MegaError::RateLimited => TransferErrorKind::Network,
            MegaError::Io(_) => TransferErrorKind::Io,
            MegaError::Integrity { .. } => TransferErrorKind::Integrity,
            _ => TransferErrorKind::Service,
        }
    }
}

impl fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferErrorKind::Network => "network",
            TransferErrorKind::Io => "local I/O",
            TransferErrorKind::Integrity => "integrity",
            TransferErrorKind::Service => "service",
        };
        f.write_str(s)
    }
}

/// Transfer failure with partial-progress context.
#[derive(Error, Debug)]
#[error("{kind} failure transferring {name} after {bytes_done} bytes{}: {source}", ChunkSuffix(*.chunk_index))]
pub struct TransferError {
    pub kind: TransferErrorKind,
    /// File name (upload) or node handle (download).
    pub name: String,
    pub chunk_index: Option<usize>,
    pub bytes_done: u64,
    #[source]
    pub source: Box<MegaError>,
}

impl TransferError {
    pub(crate) fn new(
        name: impl Into<String>,
        chunk_index: Option<usize>,
        bytes_done: u64,
        source: MegaError,
    ) -> Self {
        TransferError {
            kind: TransferErrorKind::of(&source),
            name: name.into(),
            chunk_index,
            bytes_done,
            source: Box::new(source),
        }
    }
}

/// Result type alias for megacore operations.
pub type Result<T> = std::result::Result<T, MegaError>;
