use thiserror::Error;

use crate::dispatcher::DispatchError;

/// Errors that can occur within the call scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed or past-dated submission. Rejected synchronously.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A resubmission targeted a job the scheduler has already committed to.
    #[error("Call {id} is already claimed for dispatch")]
    AlreadyClaimed { id: String },

    /// No job or active call with the given key exists (or it was evicted).
    #[error("Not found: {id}")]
    NotFound { id: String },

    /// A dispatcher callback carried a status or payload we cannot interpret.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl SchedulerError {
    /// Short error code string sent to clients in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::AlreadyClaimed { .. } => "ALREADY_CLAIMED",
            SchedulerError::NotFound { .. } => "NOT_FOUND",
            SchedulerError::InvalidEvent(_) => "INVALID_EVENT",
            SchedulerError::Dispatch(_) => "DISPATCH_FAILURE",
            SchedulerError::Database(_) => "DATABASE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
