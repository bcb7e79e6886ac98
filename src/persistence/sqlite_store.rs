// Copyright 2025 Cowboy AI, LLC.

//! SQLite-backed event record store
//!
//! A single connection sits behind `Arc<Mutex<Connection>>`. Every operation
//! runs on the blocking pool, takes the lock for the duration of one
//! statement and releases it before returning; the lock is never held across
//! an await point.
//!
//! Statements on one store run one at a time, reads included, so concurrent
//! `list` and `count` calls queue behind each other. File databases use WAL,
//! and a second store opened on the same file reads in parallel with the
//! first (see the shared-file tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::config::{DatabaseLocation, RecordStoreConfig};
use crate::errors::{RecordError, RecordResult};
use crate::events::{
    from_storage_timestamp, to_storage_timestamp, truncate_to_micros, EventRecord, EventStatus,
    NewEventRecord,
};
use crate::persistence::filter::{CompiledPredicate, SqlParam};
use crate::persistence::pagination::PagePlan;
use crate::persistence::record_store::{EventRecordStore, MAX_RETRIES};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS events (
    id          TEXT PRIMARY KEY NOT NULL,
    payload     TEXT NOT NULL,
    metadata    TEXT,
    status      TEXT NOT NULL CHECK (status IN ('pending', 'retrying', 'delivered', 'failed')),
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0)
);
CREATE INDEX IF NOT EXISTS idx_events_created_at ON events (created_at, id);
CREATE INDEX IF NOT EXISTS idx_events_updated_at ON events (updated_at, id);
CREATE INDEX IF NOT EXISTS idx_events_retry_count ON events (retry_count, id);
CREATE INDEX IF NOT EXISTS idx_events_status ON events (status);
";

const COLUMNS: &str = "id, payload, metadata, status, created_at, updated_at, retry_count";

/// Event record store on SQLite
#[derive(Clone)]
pub struct SqliteEventRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventRecordStore {
    /// Open (and if needed create) the database described by `config`
    pub fn open(config: &RecordStoreConfig) -> RecordResult<Self> {
        let conn = match &config.database {
            DatabaseLocation::InMemory => Connection::open_in_memory()?,
            DatabaseLocation::File(path) => {
                let conn = Connection::open(path)?;
                let mode: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                debug!(path = %path.display(), journal_mode = %mode, "opened event database");
                conn
            }
        };
        conn.busy_timeout(config.busy_timeout())?;
        conn.execute_batch(SCHEMA_SQL)?;

        info!(database = ?config.database, "event record store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory store
    pub fn in_memory() -> RecordResult<Self> {
        Self::open(&RecordStoreConfig::in_memory())
    }

    async fn with_connection<T, F>(&self, operation: &'static str, f: F) -> RecordResult<T>
    where
        F: FnOnce(&Connection) -> RecordResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| {
                RecordError::StorageUnavailable(format!("connection lock poisoned: {e}"))
            })?;
            f(&guard)
        })
        .await
        .map_err(|e| RecordError::StorageUnavailable(format!("{operation} did not complete: {e}")))?
    }
}

/// Row as stored, before the JSON documents and timestamps are parsed
struct RawEventRow {
    id: String,
    payload: String,
    metadata: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
    retry_count: i64,
}

impl RawEventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload: row.get(1)?,
            metadata: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            retry_count: row.get(6)?,
        })
    }

    fn into_record(self) -> RecordResult<EventRecord> {
        let status = self.status.parse::<EventStatus>().map_err(|_| {
            RecordError::Serialization(format!("unknown status '{}' on {}", self.status, self.id))
        })?;
        let retry_count = u32::try_from(self.retry_count).map_err(|_| {
            RecordError::Serialization(format!("retry_count {} on {}", self.retry_count, self.id))
        })?;
        Ok(EventRecord {
            payload: serde_json::from_str(&self.payload)?,
            metadata: self
                .metadata
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            status,
            created_at: from_storage_timestamp(&self.created_at)?,
            updated_at: from_storage_timestamp(&self.updated_at)?,
            retry_count,
            id: self.id,
        })
    }
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<RawEventRow>>,
) -> RecordResult<Vec<EventRecord>> {
    rows.map(|row| row.map_err(RecordError::from).and_then(RawEventRow::into_record))
        .collect()
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
    )
}

fn now_text() -> String {
    to_storage_timestamp(&Utc::now())
}

#[async_trait]
impl EventRecordStore for SqliteEventRecordStore {
    async fn create(&self, record: NewEventRecord) -> RecordResult<EventRecord> {
        record.validate()?;

        let created = EventRecord {
            id: record.id,
            payload: record.payload,
            metadata: record.metadata.filter(|m| !m.is_null()),
            status: EventStatus::Pending,
            created_at: truncate_to_micros(record.original_timestamp),
            updated_at: truncate_to_micros(Utc::now()),
            retry_count: record.retry_count,
        };
        let payload = serde_json::to_string(&created.payload)?;
        let metadata = created
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let row = created.clone();
        self.with_connection("create", move |conn| {
            conn.execute(
                "INSERT INTO events (id, payload, metadata, status, created_at, updated_at, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id,
                    payload,
                    metadata,
                    row.status.as_str(),
                    to_storage_timestamp(&row.created_at),
                    to_storage_timestamp(&row.updated_at),
                    row.retry_count,
                ],
            )
            .map_err(|e| {
                if is_primary_key_violation(&e) {
                    RecordError::DuplicateKey { id: row.id.clone() }
                } else {
                    RecordError::from(e)
                }
            })?;
            Ok(())
        })
        .await?;

        debug!(event_id = %created.id, "event record created");
        Ok(created)
    }

    async fn get_by_id(&self, id: &str) -> RecordResult<Option<EventRecord>> {
        let id = id.to_string();
        self.with_connection("get_by_id", move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM events WHERE id = ?1"),
                params![id],
                RawEventRow::from_row,
            )
            .optional()?
            .map(RawEventRow::into_record)
            .transpose()
        })
        .await
    }

    async fn update_status(&self, id: &str, status: EventStatus) -> RecordResult<()> {
        let id = id.to_string();
        self.with_connection("update_status", move |conn| {
            let changed = conn.execute(
                "UPDATE events SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now_text(), id],
            )?;
            debug!(event_id = %id, %status, changed, "status updated");
            Ok(())
        })
        .await
    }

    async fn transition_status(
        &self,
        id: &str,
        expected: EventStatus,
        status: EventStatus,
    ) -> RecordResult<bool> {
        let id = id.to_string();
        self.with_connection("transition_status", move |conn| {
            let changed = conn.execute(
                "UPDATE events SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![status.as_str(), now_text(), id, expected.as_str()],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn increment_retry(&self, id: &str) -> RecordResult<()> {
        let id = id.to_string();
        self.with_connection("increment_retry", move |conn| {
            conn.execute(
                "UPDATE events SET retry_count = retry_count + 1, updated_at = ?1 WHERE id = ?2",
                params![now_text(), id],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> RecordResult<bool> {
        let id = id.to_string();
        self.with_connection("delete", move |conn| {
            let changed = conn.execute("DELETE FROM events WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list(&self, plan: &PagePlan) -> RecordResult<Vec<EventRecord>> {
        let plan = plan.clone();
        self.with_connection("list", move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM events {} {} LIMIT ? OFFSET ?",
                plan.predicate.where_sql(),
                plan.order_by_sql()
            );
            let params = plan
                .predicate
                .params()
                .iter()
                .cloned()
                .chain([SqlParam::from(plan.limit), SqlParam::from(plan.offset())]);
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(params), RawEventRow::from_row)?;
            collect_records(rows)
        })
        .await
    }

    async fn count(&self, predicate: &CompiledPredicate) -> RecordResult<u64> {
        let predicate = predicate.clone();
        self.with_connection("count", move |conn| {
            let sql = format!("SELECT COUNT(*) FROM events {}", predicate.where_sql());
            let total: i64 = conn.query_row(
                &sql,
                params_from_iter(predicate.params().iter()),
                |row| row.get(0),
            )?;
            Ok(total.max(0) as u64)
        })
        .await
    }

    async fn claim_retry(
        &self,
        id: &str,
        observed_retry_count: u32,
    ) -> RecordResult<Option<EventRecord>> {
        let id = id.to_string();
        self.with_connection("claim_retry", move |conn| {
            conn.query_row(
                &format!(
                    "UPDATE events
                     SET status = 'retrying', retry_count = retry_count + 1, updated_at = ?1
                     WHERE id = ?2 AND status = 'failed' AND retry_count = ?3 AND retry_count < ?4
                     RETURNING {COLUMNS}"
                ),
                params![now_text(), id, observed_retry_count, MAX_RETRIES],
                RawEventRow::from_row,
            )
            .optional()?
            .map(RawEventRow::into_record)
            .transpose()
        })
        .await
    }

    async fn count_by_status(&self) -> RecordResult<BTreeMap<EventStatus, u64>> {
        self.with_connection("count_by_status", |conn| {
            let mut stmt =
                conn.prepare_cached("SELECT status, COUNT(*) FROM events GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut counts = BTreeMap::new();
            for row in rows {
                let (status, total) = row?;
                let status = status.parse::<EventStatus>().map_err(|_| {
                    RecordError::Serialization(format!("unknown status '{status}'"))
                })?;
                counts.insert(status, total.max(0) as u64);
            }
            Ok(counts)
        })
        .await
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> RecordResult<u64> {
        let cutoff = to_storage_timestamp(&cutoff);
        self.with_connection("purge_created_before", move |conn| {
            let removed = conn.execute("DELETE FROM events WHERE created_at < ?1", params![cutoff])?;
            info!(%cutoff, removed, "retention sweep removed event records");
            Ok(removed as u64)
        })
        .await
    }
}
