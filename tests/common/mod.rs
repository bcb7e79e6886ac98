//! Shared collaborators for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cim_event_records::{
    CounterStore, EventStatus, NotificationError, ProcessingQueue, QueueError, RetryJob,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Queue that records accepted jobs and can be switched to refuse them
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<RetryJob>>,
    refuse: AtomicBool,
}

impl RecordingQueue {
    pub fn refusing() -> Self {
        let queue = Self::default();
        queue.refuse.store(true, Ordering::SeqCst);
        queue
    }

    pub fn jobs(&self) -> Vec<RetryJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessingQueue for RecordingQueue {
    async fn enqueue(&self, job: RetryJob) -> Result<(), QueueError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("broker offline".into()));
        }
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// Counter store holding net deltas per bucket
#[derive(Default)]
pub struct RecordingCounters {
    deltas: Mutex<BTreeMap<EventStatus, i64>>,
}

impl RecordingCounters {
    pub fn delta(&self, bucket: EventStatus) -> i64 {
        self.deltas
            .lock()
            .unwrap()
            .get(&bucket)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CounterStore for RecordingCounters {
    async fn increment(&self, bucket: EventStatus) -> Result<(), NotificationError> {
        *self.deltas.lock().unwrap().entry(bucket).or_default() += 1;
        Ok(())
    }

    async fn decrement(&self, bucket: EventStatus) -> Result<(), NotificationError> {
        *self.deltas.lock().unwrap().entry(bucket).or_default() -= 1;
        Ok(())
    }
}

/// Let spawned notification tasks finish
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
