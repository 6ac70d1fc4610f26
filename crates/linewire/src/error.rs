use thiserror::Error;

use crate::server::SessionId;

/// Boxed error returned by route handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while compiling a route template.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RouteError {
    /// The template could not be turned into a matcher.
    #[error("invalid route template '{template}'")]
    InvalidPattern {
        template: String,
        #[source]
        source: regex_lite::Error,
    },
}

/// Errors produced while reading one frame off a connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameError {
    /// The underlying stream failed. The session cannot continue.
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    /// A complete line arrived but was not a valid message.
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FrameError {
    /// Whether this error ends the session (as opposed to dropping one frame).
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Io(_))
    }
}

/// Errors that can occur while writing a frame back to a session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SendError {
    /// Writing to the connection failed.
    #[error("write error: {0}")]
    Io(#[from] std::io::Error),

    /// The session has already released its connection.
    #[error("session closed")]
    Closed,
}

/// Returned by an [`Authenticator`](crate::server::Authenticator) to refuse a session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    #[error("authentication rejected: {0}")]
    Rejected(String),
}

/// Errors in server configuration values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The listen address is neither a TCP socket address nor a Unix path.
    #[error("invalid listen address '{0}'")]
    InvalidListenAddr(String),

    /// Unix sockets were requested on a platform without them.
    #[error("unix sockets are not supported on this platform")]
    UnixUnsupported,
}

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Failed to bind the listening socket.
    #[error("failed to bind '{addr}'")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting a connection failed; the accept loop stops.
    #[error("failed to accept connection")]
    Accept(#[source] std::io::Error),

    /// A session with this identifier is already registered.
    #[error("session '{0}' already active")]
    SessionAlreadyActive(SessionId),
}
