// Copyright 2025 Cowboy AI, LLC.

//! Error types for event record operations

use crate::events::EventStatus;
use thiserror::Error;

/// Errors that can occur in event record operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Event not found
    #[error("Event not found: {id}")]
    NotFound {
        /// ID that was searched for
        id: String,
    },

    /// An event with the same id already exists
    #[error("Event already exists: {id}")]
    DuplicateKey {
        /// The conflicting id
        id: String,
    },

    /// Filter request has an invalid shape or value
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Too many clause units in a single filter request
    #[error("Filter count exceeded: {units} clause units, at most {max} allowed")]
    FilterCountExceeded {
        /// Clause units requested
        units: usize,
        /// Maximum allowed clause units
        max: usize,
    },

    /// Pagination cursor could not be decoded
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Operation not allowed from the event's current status
    #[error("Invalid state: cannot {operation} event {id} while it is {current}")]
    InvalidState {
        /// Event id
        id: String,
        /// Status the event was in
        current: EventStatus,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Manual retry refused because the retry budget is spent
    #[error("Retry limit exceeded for event {id}: {retry_count} retries used, limit is {max}")]
    RetryLimitExceeded {
        /// Event id
        id: String,
        /// Retries already recorded
        retry_count: u32,
        /// Retry limit
        max: u32,
    },

    /// Payload is null or an array
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Transient storage failure, safe to retry
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The processing queue rejected or failed to accept a job
    #[error("Processing queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Stored document could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for event record operations
pub type RecordResult<T> = Result<T, RecordError>;

impl From<serde_json::Error> for RecordError {
    fn from(err: serde_json::Error) -> Self {
        RecordError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for RecordError {
    fn from(err: rusqlite::Error) -> Self {
        RecordError::StorageUnavailable(err.to_string())
    }
}

impl RecordError {
    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        RecordError::NotFound { id: id.into() }
    }

    /// Create an invalid filter error
    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        RecordError::InvalidFilter(msg.into())
    }

    /// Create an invalid cursor error
    pub fn invalid_cursor(msg: impl Into<String>) -> Self {
        RecordError::InvalidCursor(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, RecordError::NotFound { .. })
    }

    /// Check if this error is caused by the request and can be corrected by the caller
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            RecordError::DuplicateKey { .. }
                | RecordError::InvalidFilter(_)
                | RecordError::FilterCountExceeded { .. }
                | RecordError::InvalidCursor(_)
                | RecordError::InvalidState { .. }
                | RecordError::RetryLimitExceeded { .. }
                | RecordError::InvalidPayload(_)
        )
    }

    /// Check if this is an infrastructure failure the caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RecordError::StorageUnavailable(_)
                | RecordError::QueueUnavailable(_)
                | RecordError::Serialization(_)
        )
    }
}
