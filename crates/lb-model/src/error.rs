//! Profile error types.
//!
//! ## Security Note
//!
//! Messages name the offending field, never its value, so that bind
//! credentials and Kerberos passwords cannot end up in logs or dialogs.

use thiserror::Error;

/// Errors raised while building or loading a server profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// A required field was not provided.
    #[error("Server profile is missing required field: {0}")]
    Missing(&'static str),

    /// A field holds a value the engine cannot use.
    #[error("Invalid server profile: {0}")]
    Invalid(String),

    /// An environment variable could not be parsed.
    #[error("Invalid value for environment variable {name}: {reason}")]
    Environment {
        /// Variable name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ProfileError {
    /// Creates an invalid-profile error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Creates an environment parsing error.
    #[must_use]
    pub fn environment(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Environment {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for profile operations.
pub type ProfileResult<T> = Result<T, ProfileError>;
