// src/error.rs
//! Error types for the messaging core
//!
//! `ChatError` is what every public operation returns. Its `Display` text is
//! the message shown to the user. `BackendError` is what the backend
//! collaborators report; it converts into `ChatError` with `?`.

use thiserror::Error;

/// Errors returned by the messaging core
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Malformed identifier or argument, e.g. a conversation with oneself
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing or malformed user input
    #[error("{0}")]
    Validation(String),

    /// The target entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to touch the target entity
    #[error("Not allowed: {0}")]
    Forbidden(String),

    /// The live feed could not be established
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("This email is already associated with an account.")]
    EmailInUse,

    #[error("This phone number is already registered.")]
    PhoneInUse,

    #[error("Please enter a valid email address.")]
    InvalidEmail,

    #[error("Password should be at least {0} characters long.")]
    WeakPassword(usize),

    #[error("Incorrect email or password.")]
    InvalidCredentials,

    /// Network-class failure reported by the backend
    #[error("Something went wrong, please try again ({0})")]
    Backend(String),
}

impl ChatError {
    /// Whether the caller may reasonably try the same operation again.
    /// The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::ChannelUnavailable(_) | ChatError::Backend(_))
    }
}

/// Errors reported by the identity provider and document feed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("document {0} not found")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("email already in use")]
    EmailAlreadyInUse,

    #[error("invalid email")]
    InvalidEmail,

    #[error("weak password")]
    WeakPassword,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("not signed in")]
    Unauthenticated,

    #[error("{0}")]
    Other(String),
}

impl From<BackendError> for ChatError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(id) => ChatError::NotFound(id),
            BackendError::PermissionDenied(msg) => ChatError::Forbidden(msg),
            BackendError::Unavailable(msg) => ChatError::Backend(msg),
            BackendError::EmailAlreadyInUse => ChatError::EmailInUse,
            BackendError::InvalidEmail => ChatError::InvalidEmail,
            // The provider does not tell us its threshold; report ours
            BackendError::WeakPassword => ChatError::WeakPassword(crate::config::DEFAULT_MIN_PASSWORD_LENGTH),
            BackendError::InvalidCredentials => ChatError::InvalidCredentials,
            BackendError::Unauthenticated => ChatError::Validation("You must be signed in.".to_string()),
            BackendError::Other(msg) => ChatError::Backend(msg),
        }
    }
}
