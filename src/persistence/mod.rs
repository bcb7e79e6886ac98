// Copyright 2025 Cowboy AI, LLC.

//! # Persistence Layer
//!
//! Durable storage and read-path machinery for event records.
//!
//! ## Components
//!
//! - **Record Store**: the [`EventRecordStore`] trait and its SQLite backend
//! - **Filter Compilation**: request filters to bound SQL predicates
//! - **Pagination**: offset pages and keyset cursors with an id tie-break
//! - **Count Cache**: optional short-lived totals for offset pages

pub mod count_cache;
pub mod filter;
pub mod pagination;
pub mod query_support;
pub mod record_store;
pub mod sqlite_store;

pub use count_cache::CountCache;
pub use filter::{CompiledPredicate, FilterCompiler, SqlParam, MAX_FILTER_UNITS};
pub use pagination::{Cursor, PageMode, PagePlan, PaginationEngine, SortValue};
pub use query_support::{
    query_schema, EventFilter, EventQuery, FilterDimension, QueryBuilder, QueryResult,
    SortDirection, SortField, SortSpec, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use record_store::{EventRecordStore, MAX_RETRIES};
pub use sqlite_store::SqliteEventRecordStore;
