// Copyright (c) 2025 - Cowboy AI, LLC.

//! Event records and their processing status
//!
//! An [`EventRecord`] is an ingested event together with the bookkeeping the
//! store keeps about its delivery: current [`EventStatus`], timestamps and the
//! number of retries recorded so far.

use chrono::{DateTime, Datelike, Duration, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::errors::{RecordError, RecordResult};

/// Processing status of an event record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Accepted, waiting for its first delivery attempt
    Pending,
    /// Re-enqueued after a failure
    Retrying,
    /// Delivered successfully
    Delivered,
    /// Last delivery attempt failed
    Failed,
}

impl EventStatus {
    /// All statuses, in declaration order
    pub const ALL: [EventStatus; 4] = [
        EventStatus::Pending,
        EventStatus::Retrying,
        EventStatus::Delivered,
        EventStatus::Failed,
    ];

    /// Stable storage and wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Retrying => "retrying",
            EventStatus::Delivered => "delivered",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "retrying" => Ok(EventStatus::Retrying),
            "delivered" => Ok(EventStatus::Delivered),
            "failed" => Ok(EventStatus::Failed),
            other => Err(RecordError::invalid_filter(format!(
                "unknown event status '{other}'"
            ))),
        }
    }
}

/// A stored event with its lifecycle bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventRecord {
    /// Caller-supplied unique id
    pub id: String,
    /// The event document
    pub payload: Value,
    /// Optional metadata document
    pub metadata: Option<Value>,
    /// Current processing status
    pub status: EventStatus,
    /// Original ingestion time
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation
    pub updated_at: DateTime<Utc>,
    /// Retries recorded so far
    pub retry_count: u32,
}

impl EventRecord {
    /// Whether the record has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        use crate::state_machine::State;
        self.status.is_terminal()
    }
}

/// Input for creating a new event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEventRecord {
    /// Caller-supplied unique id
    pub id: String,
    /// The event document; must be a non-null, non-array value
    pub payload: Value,
    /// Optional metadata document
    pub metadata: Option<Value>,
    /// Ingestion time, stored as `created_at`
    pub original_timestamp: DateTime<Utc>,
    /// Initial retry count
    #[serde(default)]
    pub retry_count: u32,
}

impl NewEventRecord {
    /// Create input with no metadata and a zero retry count
    pub fn new(id: impl Into<String>, payload: Value, original_timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            payload,
            metadata: None,
            original_timestamp,
            retry_count: 0,
        }
    }

    /// Attach a metadata document
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Start from a non-zero retry count
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Check the payload shape
    pub fn validate(&self) -> RecordResult<()> {
        if self.id.is_empty() {
            return Err(RecordError::InvalidPayload("event id must not be empty".into()));
        }
        if !is_storable(&self.original_timestamp) {
            return Err(RecordError::InvalidPayload(format!(
                "original_timestamp {} is outside years 0000-9999",
                self.original_timestamp
            )));
        }
        match self.payload {
            Value::Null => Err(RecordError::InvalidPayload("payload must not be null".into())),
            Value::Array(_) => Err(RecordError::InvalidPayload(
                "payload must not be an array".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Render a timestamp the way it is stored: fixed-width RFC 3339, microseconds, `Z`
///
/// Fixed width keeps lexical and chronological order identical, which the
/// range and keyset clauses rely on.
pub(crate) fn to_storage_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Whether a timestamp fits the fixed-width storage format (years 0000-9999)
pub(crate) fn is_storable(ts: &DateTime<Utc>) -> bool {
    (0..=9999).contains(&ts.year())
}

/// Round up to the next whole microsecond when sub-microsecond digits are present
///
/// Lower range bounds use this so the stored, truncated form never admits
/// rows earlier than the requested instant.
pub(crate) fn ceil_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = truncate_to_micros(ts);
    if truncated < ts {
        truncated + Duration::microseconds(1)
    } else {
        truncated
    }
}

/// Parse a stored timestamp
pub(crate) fn from_storage_timestamp(raw: &str) -> RecordResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RecordError::Serialization(format!("bad timestamp '{raw}': {e}")))
}

/// Drop sub-microsecond precision so a value survives a storage round trip unchanged
pub(crate) fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}
