//! Directory engine error types.
//!
//! ## Security Note
//!
//! Error messages must not leak bind credentials or Kerberos passwords.
//! Server diagnostic text is included because the host shows it verbatim.

use lb_model::ProfileError;
use thiserror::Error;

/// Errors reported by a directory session (one protocol round-trip).
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The server or network dropped the connection.
    #[error("Connection closed by peer: {0}")]
    Disconnected(String),

    /// The operation did not complete within the profile timeout.
    #[error("LDAP operation timed out")]
    Timeout,

    /// Bind (authentication) was rejected.
    #[error("LDAP bind failed: {0}")]
    Bind(String),

    /// The server answered with a non-success result code.
    #[error("LDAP error {rc}: {message}")]
    Result {
        /// LDAP result code.
        rc: u32,
        /// Diagnostic text from the server.
        message: String,
    },

    /// The response could not be decoded.
    #[error("Malformed LDAP response: {0}")]
    Malformed(String),

    /// Transport or TLS failure other than a dropped connection.
    #[error("LDAP transport error: {0}")]
    Transport(String),

    /// The backend cannot perform the requested operation.
    #[error("Not supported: {0}")]
    Unsupported(String),
}

impl SessionError {
    /// Creates a disconnect error.
    #[must_use]
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::Disconnected(msg.into())
    }

    /// Creates a malformed-response error.
    #[must_use]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Creates a result-code error.
    #[must_use]
    pub fn result(rc: u32, message: impl Into<String>) -> Self {
        Self::Result {
            rc,
            message: message.into(),
        }
    }

    /// Checks if the connection was dropped, which allows one transparent
    /// reconnect.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }

    /// Checks if this is a connection-related error.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Timeout | Self::Transport(_))
    }
}

/// Errors raised by `connect()`.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The profile is incomplete or invalid.
    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// Kerberos login failed before any connection was attempted.
    #[error("Kerberos login failed: {0}")]
    Login(String),

    /// Transport, TLS or bind failure.
    #[error("Could not connect to directory: {0}")]
    Session(#[from] SessionError),
}

impl ConnectionError {
    /// Creates a Kerberos login error.
    #[must_use]
    pub fn login(msg: impl Into<String>) -> Self {
        Self::Login(msg.into())
    }
}

/// Errors raised by list, search and get operations.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No session is open.
    #[error("Not connected")]
    NotConnected,

    /// A base-scope fetch returned no entry.
    #[error("No such entry: {0}")]
    NotFound(String),

    /// The operation failed on the wire.
    #[error("Directory query failed: {0}")]
    Session(#[from] SessionError),

    /// A dropped connection was detected, and re-establishing it failed.
    #[error("Reconnect after dropped connection failed: {0}")]
    Reconnect(#[source] ConnectionError),
}

impl QueryError {
    /// Checks if the query failed because the connection was dropped.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Session(SessionError::Disconnected(_)))
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;
