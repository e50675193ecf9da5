//! Unified error types and result handling.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants follow the
//! failure classes a reconciliation trigger has to tell apart: bad input, bad credentials,
//! missing payment or user, provider trouble, store trouble and misconfiguration.
//! A duplicate transaction is not an error: the idempotency guard reports it as a normal
//! outcome and callers treat it as success.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed request fields.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// Webhook signature or session identity could not be trusted.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Why authentication failed
        message: String,
    },

    /// No matching payment, checkout session or record.
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing thing
        what: String,
    },

    /// The credit target does not have an account in the ledger.
    #[error("User not found: {user_id}")]
    UserNotFound {
        /// User id that was looked up
        user_id: String,
    },

    /// The payment provider API was unreachable or returned an error. Safe to retry.
    #[error("Payment provider error: {message}")]
    UpstreamProvider {
        /// Provider error description
        message: String,
    },

    /// The ledger store failed. Never interpreted as "not yet claimed".
    #[error("Persistence error: {0}")]
    Persistence(#[from] sea_orm::DbErr),

    /// Missing secrets, ids or an unreadable configuration file.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is misconfigured
        message: String,
    },

    /// A purchase attempt was asked to move between states it cannot move between.
    #[error("Invalid purchase attempt transition: {from} -> {to}")]
    InvalidTransition {
        /// State the attempt was in
        from: String,
        /// State that was requested
        to: String,
    },

    /// I/O failure (config files, socket binding).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable could not be read.
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

impl Error {
    /// Shorthand for a [`Error::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::NotFound`] error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Whether a caller may retry the same operation under the same transaction key.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamProvider { .. } | Self::Persistence(_))
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
