// Copyright 2025 Cowboy AI, LLC.

//! Event record store trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::errors::RecordResult;
use crate::events::{EventRecord, EventStatus, NewEventRecord};
use crate::persistence::filter::CompiledPredicate;
use crate::persistence::pagination::PagePlan;

/// Retries a record may accumulate before a manual retry is refused
pub const MAX_RETRIES: u32 = 3;

/// Durable storage for event records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventRecordStore: Send + Sync {
    /// Insert a new pending record; fails with `DuplicateKey` on a reused id
    async fn create(&self, record: NewEventRecord) -> RecordResult<EventRecord>;

    /// Load a record by id
    async fn get_by_id(&self, id: &str) -> RecordResult<Option<EventRecord>>;

    /// Overwrite the status and refresh `updated_at`; missing ids are a no-op
    async fn update_status(&self, id: &str, status: EventStatus) -> RecordResult<()>;

    /// Move a record from `expected` to `status` in one conditional update
    ///
    /// Returns `false` when the record is missing or no longer in `expected`.
    async fn transition_status(
        &self,
        id: &str,
        expected: EventStatus,
        status: EventStatus,
    ) -> RecordResult<bool>;

    /// Add one to `retry_count` and refresh `updated_at`
    async fn increment_retry(&self, id: &str) -> RecordResult<()>;

    /// Delete a record; returns whether a row was removed
    async fn delete(&self, id: &str) -> RecordResult<bool>;

    /// Fetch one page in plan order
    async fn list(&self, plan: &PagePlan) -> RecordResult<Vec<EventRecord>>;

    /// Count rows matching a predicate
    async fn count(&self, predicate: &CompiledPredicate) -> RecordResult<u64>;

    /// Move a failed record to retrying in one conditional update
    ///
    /// Succeeds only if the record is still `failed` with exactly
    /// `observed_retry_count` retries and below [`MAX_RETRIES`]; the updated
    /// record is returned. `None` means another writer got there first.
    async fn claim_retry(
        &self,
        id: &str,
        observed_retry_count: u32,
    ) -> RecordResult<Option<EventRecord>>;

    /// Number of records per status (statuses with no rows are omitted)
    async fn count_by_status(&self) -> RecordResult<BTreeMap<EventStatus, u64>>;

    /// Retention sweep: delete every record created before `cutoff`
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> RecordResult<u64>;
}
