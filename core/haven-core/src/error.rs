//! Error types for haven-core operations.
//!
//! One rich error enum for the whole crate. Notifier transport failures are
//! deliberately a separate, smaller type (`NotifyError`): a failed delivery is
//! an expected condition handled by the sync loop, not a crate error.

use std::path::PathBuf;

/// All errors that can occur in haven-core operations.
#[derive(Debug, thiserror::Error)]
pub enum HavenError {
    // ─────────────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Store unavailable: {path}: {details}")]
    StoreUnavailable { path: PathBuf, details: String },

    #[error("Store operation failed: {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("JSON encoding error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Input Validation Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ─────────────────────────────────────────────────────────────────────
    // Lookup Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Safe route not found: {0}")]
    RouteNotFound(String),

    #[error("Safe zone not found: {0}")]
    ZoneNotFound(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Pending event not found: {0}")]
    EventNotFound(String),

    #[error("No SOS is currently active")]
    NoActiveSos,
}

impl HavenError {
    pub(crate) fn store(context: impl Into<String>, source: rusqlite::Error) -> Self {
        HavenError::Store {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        HavenError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using HavenError.
pub type Result<T> = std::result::Result<T, HavenError>;

/// Failure reported by an [`AlertNotifier`](crate::sync::AlertNotifier)
/// implementation. Kept to a message string so transports of any kind
/// (SMS gateway, push service, email) can report through it.
#[derive(Debug, thiserror::Error)]
#[error("Notification delivery failed: {message}")]
pub struct NotifyError {
    pub message: String,
}

impl NotifyError {
    pub fn new(message: impl Into<String>) -> Self {
        NotifyError {
            message: message.into(),
        }
    }
}
