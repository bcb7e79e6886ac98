// Copyright 2025 Cowboy AI, LLC.

//! Lifecycle operations on event records
//!
//! [`LifecycleController`] is the write side operators and the processing
//! pipeline go through: acknowledging, retrying, ingesting and recording
//! outcomes. Status changes are checked against the state machine in
//! [`crate::state_machine`], and every change is followed by a
//! fire-and-forget notification to the [`CounterStore`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{RecordError, RecordResult};
use crate::events::{EventRecord, EventStatus, NewEventRecord};
use crate::persistence::{EventRecordStore, MAX_RETRIES};
use crate::state_machine::{State, StateTransitions, StatusTransition};

/// Failure reported by a [`ProcessingQueue`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue could not be reached
    #[error("queue unreachable: {0}")]
    Unavailable(String),
    /// The queue refused the job
    #[error("job rejected: {0}")]
    Rejected(String),
}

/// Failure reported by a [`CounterStore`]; logged, never returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("counter update failed: {0}")]
pub struct NotificationError(pub String);

/// Work item handed to the processing pipeline for a manual retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryJob {
    /// Event being retried
    pub event_id: String,
    /// Event payload
    pub payload: Value,
    /// Event metadata
    pub metadata: Option<Value>,
    /// Retry count after this retry was claimed
    pub retry_count: u32,
    /// Correlates the job with logs and downstream effects
    pub correlation_id: Uuid,
}

impl RetryJob {
    fn for_record(record: &EventRecord) -> Self {
        Self {
            event_id: record.id.clone(),
            payload: record.payload.clone(),
            metadata: record.metadata.clone(),
            retry_count: record.retry_count,
            correlation_id: Uuid::new_v4(),
        }
    }
}

/// Queue that carries retry jobs to the processing pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessingQueue: Send + Sync {
    /// Hand a job to the pipeline
    async fn enqueue(&self, job: RetryJob) -> Result<(), QueueError>;
}

/// Per-status counters kept by the metrics side
///
/// Buckets are named after statuses (`EventStatus::as_str`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add one to a bucket
    async fn increment(&self, bucket: EventStatus) -> Result<(), NotificationError>;
    /// Remove one from a bucket
    async fn decrement(&self, bucket: EventStatus) -> Result<(), NotificationError>;
}

/// Outcome of a processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingOutcome {
    /// The event reached its destination
    Delivered,
    /// The attempt failed
    Failed,
}

impl ProcessingOutcome {
    /// Status the outcome moves the event to
    pub fn status(&self) -> EventStatus {
        match self {
            ProcessingOutcome::Delivered => EventStatus::Delivered,
            ProcessingOutcome::Failed => EventStatus::Failed,
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            ProcessingOutcome::Delivered => "mark delivered",
            ProcessingOutcome::Failed => "mark failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CounterChange {
    Increment(EventStatus),
    Decrement(EventStatus),
}

/// Fire-and-forget sender for counter changes
#[derive(Clone)]
struct CounterNotifier {
    counters: Arc<dyn CounterStore>,
}

impl CounterNotifier {
    fn send(&self, event_id: &str, changes: Vec<CounterChange>) {
        let counters = Arc::clone(&self.counters);
        let event_id = event_id.to_string();
        tokio::spawn(async move {
            for change in changes {
                let (bucket, result) = match change {
                    CounterChange::Increment(bucket) => (bucket, counters.increment(bucket).await),
                    CounterChange::Decrement(bucket) => (bucket, counters.decrement(bucket).await),
                };
                if let Err(e) = result {
                    warn!(event_id = %event_id, %bucket, error = %e, "counter notification dropped");
                }
            }
        });
    }
}

/// Applies lifecycle operations to event records
pub struct LifecycleController {
    store: Arc<dyn EventRecordStore>,
    queue: Arc<dyn ProcessingQueue>,
    notifier: CounterNotifier,
}

impl LifecycleController {
    /// Create a controller over a store and its collaborators
    pub fn new(
        store: Arc<dyn EventRecordStore>,
        queue: Arc<dyn ProcessingQueue>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            store,
            queue,
            notifier: CounterNotifier { counters },
        }
    }

    async fn load(&self, id: &str) -> RecordResult<EventRecord> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| RecordError::not_found(id))
    }

    /// Store a newly received event as pending
    pub async fn ingest(&self, record: NewEventRecord) -> RecordResult<EventRecord> {
        let created = self.store.create(record).await?;
        info!(event_id = %created.id, retry_count = created.retry_count, "event ingested");
        self.notifier
            .send(&created.id, vec![CounterChange::Increment(EventStatus::Pending)]);
        Ok(created)
    }

    /// Delete an event, whatever its status
    pub async fn acknowledge(&self, id: &str) -> RecordResult<()> {
        let record = self.load(id).await?;
        if !self.store.delete(id).await? {
            return Err(RecordError::not_found(id));
        }
        info!(event_id = %id, status = %record.status, "event acknowledged");
        self.notifier
            .send(id, vec![CounterChange::Decrement(record.status)]);
        Ok(())
    }

    /// Send a failed event back through processing
    ///
    /// The claim and the enqueue run on their own task, so dropping the
    /// returned future after the claim has started does not leave the event
    /// stuck in `retrying` without a job. When the queue refuses the job the
    /// event goes back to `failed` with the attempt still counted.
    pub async fn retry(&self, id: &str) -> RecordResult<RetryJob> {
        let record = self.load(id).await?;
        check_retryable(&record)?;

        let store = Arc::clone(&self.store);
        let queue = Arc::clone(&self.queue);
        let notifier = self.notifier.clone();
        tokio::spawn(async move { claim_and_enqueue(store, queue, notifier, record).await })
            .await
            .map_err(|e| RecordError::StorageUnavailable(format!("retry task failed: {e}")))?
    }

    /// Apply the outcome of a processing attempt
    ///
    /// The status only changes if the record still holds the status that was
    /// checked against the state machine; a record deleted or moved by another
    /// writer in between yields `NotFound` or `InvalidState` and no counter
    /// notification.
    pub async fn record_outcome(
        &self,
        id: &str,
        outcome: ProcessingOutcome,
    ) -> RecordResult<StatusTransition> {
        let record = self.load(id).await?;
        let target = outcome.status();
        if !record.status.can_transition_to(&target) {
            return Err(RecordError::InvalidState {
                id: id.to_string(),
                current: record.status,
                operation: outcome.operation(),
            });
        }

        if !self
            .store
            .transition_status(id, record.status, target)
            .await?
        {
            return Err(match self.store.get_by_id(id).await? {
                None => RecordError::not_found(id),
                Some(current) => RecordError::InvalidState {
                    id: id.to_string(),
                    current: current.status,
                    operation: outcome.operation(),
                },
            });
        }
        let transition = StatusTransition::now(id, record.status, target);
        info!(
            event_id = %id,
            from = transition.from.name(),
            to = transition.to.name(),
            "event status changed"
        );
        self.notifier.send(
            id,
            vec![
                CounterChange::Decrement(record.status),
                CounterChange::Increment(target),
            ],
        );
        Ok(transition)
    }

    /// Count one automatic processing attempt
    pub async fn record_attempt(&self, id: &str) -> RecordResult<EventRecord> {
        let record = self.load(id).await?;
        if record.status.is_terminal() {
            return Err(RecordError::InvalidState {
                id: id.to_string(),
                current: record.status,
                operation: "record an attempt for",
            });
        }
        self.store.increment_retry(id).await?;
        self.load(id).await
    }
}

fn check_retryable(record: &EventRecord) -> RecordResult<()> {
    if record.status != EventStatus::Failed {
        return Err(RecordError::InvalidState {
            id: record.id.clone(),
            current: record.status,
            operation: "retry",
        });
    }
    if record.retry_count >= MAX_RETRIES {
        return Err(RecordError::RetryLimitExceeded {
            id: record.id.clone(),
            retry_count: record.retry_count,
            max: MAX_RETRIES,
        });
    }
    Ok(())
}

async fn claim_and_enqueue(
    store: Arc<dyn EventRecordStore>,
    queue: Arc<dyn ProcessingQueue>,
    notifier: CounterNotifier,
    observed: EventRecord,
) -> RecordResult<RetryJob> {
    let id = observed.id.clone();
    let claimed = match store.claim_retry(&id, observed.retry_count).await? {
        Some(claimed) => claimed,
        None => return Err(lost_claim(store.as_ref(), &observed).await),
    };

    let job = RetryJob::for_record(&claimed);
    if let Err(e) = queue.enqueue(job.clone()).await {
        warn!(event_id = %id, error = %e, "retry enqueue failed, returning event to failed");
        match store
            .transition_status(&id, EventStatus::Retrying, EventStatus::Failed)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(event_id = %id, "event moved by another writer, not returned to failed")
            }
            Err(revert) => {
                error!(event_id = %id, error = %revert, "could not return event to failed")
            }
        }
        return Err(RecordError::QueueUnavailable(e.to_string()));
    }

    info!(
        event_id = %id,
        retry_count = claimed.retry_count,
        correlation_id = %job.correlation_id,
        "event queued for retry"
    );
    notifier.send(
        &id,
        vec![
            CounterChange::Decrement(EventStatus::Failed),
            CounterChange::Increment(EventStatus::Retrying),
        ],
    );
    Ok(job)
}

/// Explain why a claim matched no row, from the record as it is now
async fn lost_claim(store: &dyn EventRecordStore, observed: &EventRecord) -> RecordError {
    match store.get_by_id(&observed.id).await {
        Ok(None) => RecordError::not_found(observed.id.clone()),
        Ok(Some(current)) => match check_retryable(&current) {
            Err(e) => e,
            // Failed and under the limit, but another caller moved retry_count.
            Ok(()) => RecordError::InvalidState {
                id: current.id,
                current: EventStatus::Retrying,
                operation: "retry",
            },
        },
        Err(e) => e,
    }
}
