// Copyright 2025 Cowboy AI, LLC.

//! Offset and keyset pagination
//!
//! Every plan orders by the sort field and then by `id` in the same
//! direction, so rows sharing a sort value still have a strict total order.
//! Keyset pages continue strictly after the `(sort value, id)` pair carried
//! in the cursor, which is what keeps page walks free of gaps and duplicates
//! when many rows tie on the sort field.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{RecordError, RecordResult};
use crate::events::{is_storable, to_storage_timestamp, EventRecord};
use crate::persistence::filter::{CompiledPredicate, SqlParam};
use crate::persistence::query_support::{
    EventQuery, SortDirection, SortField, SortSpec, MAX_PAGE_SIZE,
};

/// Value of the sort field for one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortValue {
    /// created_at or updated_at
    Timestamp(DateTime<Utc>),
    /// retry_count
    Count(u32),
}

impl SortValue {
    /// Read the sort value of a record
    pub fn of(record: &EventRecord, field: SortField) -> Self {
        match field {
            SortField::CreatedAt => SortValue::Timestamp(record.created_at),
            SortField::UpdatedAt => SortValue::Timestamp(record.updated_at),
            SortField::RetryCount => SortValue::Count(record.retry_count),
        }
    }

    fn matches(&self, field: SortField) -> bool {
        match self {
            SortValue::Timestamp(_) => field.is_timestamp(),
            SortValue::Count(_) => field == SortField::RetryCount,
        }
    }

    fn to_param(&self) -> SqlParam {
        match self {
            SortValue::Timestamp(ts) => SqlParam::from(to_storage_timestamp(ts)),
            SortValue::Count(n) => SqlParam::from(*n),
        }
    }
}

/// Position after the last row of a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Id of the last row
    pub id: String,
    /// Field the page was sorted by
    pub field: SortField,
    /// Sort value of the last row
    pub value: SortValue,
}

impl Cursor {
    /// Create a cursor
    pub fn new(id: impl Into<String>, field: SortField, value: SortValue) -> Self {
        Self {
            id: id.into(),
            field,
            value,
        }
    }

    /// Cursor pointing just past a record
    pub fn after(record: &EventRecord, field: SortField) -> Self {
        Self::new(record.id.clone(), field, SortValue::of(record, field))
    }

    /// Opaque wire form: base64url of a compact JSON record
    pub fn encode(&self) -> String {
        // Serializing a struct of strings, enums and numbers cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a wire cursor; any malformed input is [`RecordError::InvalidCursor`]
    pub fn decode(raw: &str) -> RecordResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|e| RecordError::invalid_cursor(format!("not base64url: {e}")))?;
        let cursor: Cursor = serde_json::from_slice(&bytes)
            .map_err(|e| RecordError::invalid_cursor(format!("unreadable cursor: {e}")))?;
        if cursor.id.is_empty() {
            return Err(RecordError::invalid_cursor("cursor id is empty"));
        }
        if let SortValue::Timestamp(ts) = &cursor.value {
            if !is_storable(ts) {
                return Err(RecordError::invalid_cursor(format!(
                    "cursor timestamp {ts} is outside years 0000-9999"
                )));
            }
        }
        if !cursor.value.matches(cursor.field) {
            return Err(RecordError::invalid_cursor(format!(
                "cursor value does not fit sort field {}",
                cursor.field
            )));
        }
        Ok(cursor)
    }
}

/// How a page is positioned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageMode {
    /// Numeric offset; totals are reported
    Offset {
        /// Rows skipped
        offset: u32,
    },
    /// Keyset continuation after a cursor; totals are omitted
    Cursor(Cursor),
}

/// Everything the store needs to fetch one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    /// Filter predicate plus any keyset boundary clause
    pub predicate: CompiledPredicate,
    /// Resolved sort
    pub sort: SortSpec,
    /// Page size
    pub limit: u32,
    /// Positioning mode
    pub mode: PageMode,
}

impl PagePlan {
    /// `ORDER BY` fragment with the id tie-break
    pub fn order_by_sql(&self) -> String {
        let dir = self.sort.direction.keyword();
        format!("ORDER BY {} {dir}, id {dir}", self.sort.field.column())
    }

    /// Rows skipped before the page (always 0 in keyset mode)
    pub fn offset(&self) -> u32 {
        match self.mode {
            PageMode::Offset { offset } => offset,
            PageMode::Cursor(_) => 0,
        }
    }

    /// Whether this plan reports totals
    pub fn is_offset_mode(&self) -> bool {
        matches!(self.mode, PageMode::Offset { .. })
    }
}

/// Builds page plans and next-page cursors
#[derive(Debug, Clone, Copy, Default)]
pub struct PaginationEngine;

impl PaginationEngine {
    /// Plan a page for a validated query on top of its compiled predicate
    pub fn plan(predicate: CompiledPredicate, query: &EventQuery) -> RecordResult<PagePlan> {
        let sort = query.sort();
        let requested = query.page_size();
        let limit = requested.clamp(1, MAX_PAGE_SIZE);
        if limit != requested {
            debug!(requested, limit, "page size clamped");
        }

        let mode = match &query.cursor {
            Some(raw) => {
                let cursor = Cursor::decode(raw)?;
                if cursor.field != sort.field {
                    return Err(RecordError::invalid_cursor(format!(
                        "cursor was issued for sort field {} but the query sorts by {}",
                        cursor.field, sort.field
                    )));
                }
                PageMode::Cursor(cursor)
            }
            None => PageMode::Offset {
                offset: query.offset.unwrap_or(0),
            },
        };

        let mut predicate = predicate;
        if let PageMode::Cursor(cursor) = &mode {
            let (clause, params) = boundary_clause(sort, cursor);
            predicate.push(clause, params);
        }

        Ok(PagePlan {
            predicate,
            sort,
            limit,
            mode,
        })
    }

    /// Cursor for the next page, present iff the page came back full
    ///
    /// A full final page yields a cursor whose page is empty; callers accept
    /// that in exchange for not probing for one more row.
    pub fn next_cursor(plan: &PagePlan, page: &[EventRecord]) -> Option<String> {
        if page.len() != plan.limit as usize {
            return None;
        }
        page.last()
            .map(|last| Cursor::after(last, plan.sort.field).encode())
    }
}

/// `field < v OR (field = v AND id < last_id)`, or the `>` form for ascending sorts
fn boundary_clause(sort: SortSpec, cursor: &Cursor) -> (String, [SqlParam; 3]) {
    let op = match sort.direction {
        SortDirection::Ascending => ">",
        SortDirection::Descending => "<",
    };
    let column = sort.field.column();
    let value = cursor.value.to_param();
    (
        format!("({column} {op} ? OR ({column} = ? AND id {op} ?))"),
        [value.clone(), value, SqlParam::from(cursor.id.clone())],
    )
}
