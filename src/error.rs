//! Error types for leadflow.

use chrono::{DateTime, Utc};

/// Top-level error type for the engagement engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
}

/// Missing or malformed input. Always rejected before anything is applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing contact identifier")]
    MissingContact,

    #[error("Message body is empty")]
    EmptyBody,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Schedule time {fire_at} is not in the future (now {now})")]
    InvalidScheduleTime {
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("Invalid scheduled send: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Scheduler is shut down")]
    ShutDown,
}

/// Failures reported by the dispatch collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Send to {contact} failed: {reason}")]
    SendFailed { contact: String, reason: String },

    #[error("Contact {contact} is marked do-not-contact")]
    DoNotContact { contact: String },

    #[error("Invalid outbound message: {0}")]
    Invalid(#[from] ValidationError),
}

/// Result type alias for leadflow.
pub type Result<T> = std::result::Result<T, Error>;
