// Copyright 2025 Cowboy AI, LLC.

//! # CIM Event Records
//!
//! Durable event records with a processing-status lifecycle, plus the read
//! path operators use to browse them.
//!
//! This crate provides:
//! - **Record Store**: Persistent event records on SQLite with a status lifecycle
//! - **Filter Compilation**: Multi-dimensional filters as bound SQL predicates
//! - **Pagination**: Offset pages with totals and keyset cursors without them
//! - **Lifecycle Control**: Acknowledge, retry, ingest and outcome recording
//! - **State Machine**: The legal status transitions
//!
//! ## Design Principles
//!
//! 1. **Bound Parameters Only**: No request value is ever spliced into SQL text
//! 2. **Stable Ordering**: Every sort is tie-broken by id
//! 3. **Atomic Claims**: A retry is claimed by a single conditional update
//! 4. **Best-Effort Notifications**: Counter updates never fail an operation
//!
//! ## Example
//!
//! ```rust,no_run
//! use cim_event_records::{EventQueryService, QueryBuilder, EventStatus, SqliteEventRecordStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> cim_event_records::RecordResult<()> {
//! let store = Arc::new(SqliteEventRecordStore::in_memory()?);
//! let queries = EventQueryService::new(store);
//! let page = queries
//!     .search(&QueryBuilder::new().status(EventStatus::Failed).limit(20).build())
//!     .await?;
//! println!("{} failed events", page.total_count.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod persistence;
pub mod query_handlers;
pub mod state_machine;

pub use config::{CountCacheConfig, DatabaseLocation, RecordStoreConfig};
pub use errors::{RecordError, RecordResult};
pub use events::{EventRecord, EventStatus, NewEventRecord};
pub use lifecycle::{
    CounterStore, LifecycleController, NotificationError, ProcessingOutcome, ProcessingQueue,
    QueueError, RetryJob,
};
pub use persistence::{
    query_schema, CompiledPredicate, CountCache, Cursor, EventFilter, EventQuery,
    EventRecordStore, FilterCompiler, FilterDimension, PagePlan, PaginationEngine, QueryBuilder,
    QueryResult, SortDirection, SortField, SortSpec, SqliteEventRecordStore, MAX_FILTER_UNITS,
    MAX_RETRIES,
};
pub use query_handlers::EventQueryService;
pub use state_machine::{State, StateTransitions, StatusTransition};
