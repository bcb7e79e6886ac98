// Copyright 2025 Cowboy AI, LLC.

//! Query handlers for event records
//!
//! The read side: validate a request, compile its filter, plan the page,
//! fetch it from the store and assemble the paging metadata.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::RecordStoreConfig;
use crate::errors::{RecordError, RecordResult};
use crate::events::EventRecord;
use crate::persistence::{
    CompiledPredicate, CountCache, EventQuery, EventRecordStore, FilterCompiler, PaginationEngine,
    QueryResult,
};

/// Executes event listing queries against a record store
pub struct EventQueryService {
    store: Arc<dyn EventRecordStore>,
    count_cache: Option<CountCache>,
}

impl EventQueryService {
    /// Create a service that counts every offset page exactly
    pub fn new(store: Arc<dyn EventRecordStore>) -> Self {
        Self {
            store,
            count_cache: None,
        }
    }

    /// Create a service using the count cache settings of a store config
    pub fn from_config(store: Arc<dyn EventRecordStore>, config: &RecordStoreConfig) -> Self {
        Self {
            store,
            count_cache: CountCache::from_config(&config.count_cache),
        }
    }

    /// Serve offset-mode totals from a cache
    pub fn with_count_cache(mut self, cache: CountCache) -> Self {
        self.count_cache = Some(cache);
        self
    }

    /// Look up a single record
    pub async fn get(&self, id: &str) -> RecordResult<EventRecord> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| RecordError::not_found(id))
    }

    /// Run a query and return one page
    ///
    /// A `next_cursor` is issued whenever the page is full, in both modes,
    /// without checking that another row exists.
    ///
    /// Offset mode reports `total_count` and derives `has_more` from it, so
    /// a full final offset page has `has_more == false` yet still carries a
    /// cursor. Following that cursor yields an empty page. Cursor mode never
    /// counts; `has_more` is true exactly when a next cursor was issued.
    pub async fn search(&self, query: &EventQuery) -> RecordResult<QueryResult<EventRecord>> {
        let started = Instant::now();

        query.validate()?;
        let predicate = FilterCompiler::compile(&query.filter)?;
        let applied_filters = predicate.applied().to_vec();
        let count_predicate = predicate.clone();
        let plan = PaginationEngine::plan(predicate, query)?;

        let items = self.store.list(&plan).await?;
        let next_cursor = PaginationEngine::next_cursor(&plan, &items);

        let (total_count, has_more) = if plan.is_offset_mode() {
            let total = self.total(&count_predicate).await?;
            let seen = u64::from(plan.offset()) + items.len() as u64;
            (Some(total), seen < total)
        } else {
            (None, next_cursor.is_some())
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            returned = items.len(),
            ?total_count,
            has_more,
            execution_time_ms,
            "event query served"
        );

        Ok(QueryResult {
            items,
            total_count,
            has_more,
            next_cursor,
            applied_filters,
            sort: plan.sort,
            execution_time_ms,
        })
    }

    /// [`search`](Self::search) bounded by a deadline
    ///
    /// An expired deadline surfaces as `StorageUnavailable`.
    pub async fn search_within(
        &self,
        query: &EventQuery,
        deadline: Duration,
    ) -> RecordResult<QueryResult<EventRecord>> {
        match tokio::time::timeout(deadline, self.search(query)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?deadline, "event query timed out");
                Err(RecordError::StorageUnavailable(format!(
                    "query did not finish within {}ms",
                    deadline.as_millis()
                )))
            }
        }
    }

    async fn total(&self, predicate: &CompiledPredicate) -> RecordResult<u64> {
        if let Some(cache) = &self.count_cache {
            if let Some(total) = cache.get(predicate).await {
                return Ok(total);
            }
        }
        let total = self.store.count(predicate).await?;
        if let Some(cache) = &self.count_cache {
            cache.put(predicate, total).await;
        }
        Ok(total)
    }
}
