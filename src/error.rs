use thiserror::Error;

/// Failures establishing a session against a remote server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("server unreachable: {0}")]
    Unreachable(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("protocol not supported: {0}")]
    Unsupported(String),
}

/// Failures listing a remote directory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListError {
    #[error("not connected to a server")]
    NotConnected,

    #[error("remote path not found: {0}")]
    NotFound(String),

    #[error("listing failed: {0}")]
    Unreachable(String),
}

/// Failures fetching remote file contents into a local destination.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("not connected to a server")]
    NotConnected,

    #[error("remote file not found: {0}")]
    NotFound(String),

    #[error("transfer failed: {0}")]
    Unreachable(String),

    #[error("could not write local file: {0}")]
    WriteFailed(String),
}

// Backends that probe the endpoint per operation surface their handshake
// failures through the operation's own taxonomy.
impl From<ConnectionError> for ListError {
    fn from(err: ConnectionError) -> Self {
        Self::Unreachable(err.to_string())
    }
}

impl From<ConnectionError> for FetchError {
    fn from(err: ConnectionError) -> Self {
        Self::Unreachable(err.to_string())
    }
}
