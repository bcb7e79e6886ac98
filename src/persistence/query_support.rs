// Copyright 2025 Cowboy AI, LLC.

//! Query support for the event record store
//!
//! [`EventQuery`] is the filter request accepted from upstream callers.
//! Every dimension is optional; [`EventQuery::validate`] is the shape check
//! that runs before anything is compiled.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::errors::{RecordError, RecordResult};
use crate::events::{ceil_to_micros, is_storable, EventStatus};

/// Default page size when the caller does not give one
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Whitelisted sort fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Ingestion time
    #[default]
    #[serde(alias = "createdAt")]
    CreatedAt,
    /// Last mutation time
    #[serde(alias = "updatedAt")]
    UpdatedAt,
    /// Number of retries
    #[serde(alias = "retryCount")]
    RetryCount,
}

impl SortField {
    /// Column this field sorts on; only ever one of these constants
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::RetryCount => "retry_count",
        }
    }

    /// Whether values of this field are timestamps
    pub fn is_timestamp(&self) -> bool {
        matches!(self, SortField::CreatedAt | SortField::UpdatedAt)
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for SortField {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" | "createdAt" => Ok(SortField::CreatedAt),
            "updated_at" | "updatedAt" => Ok(SortField::UpdatedAt),
            "retry_count" | "retryCount" => Ok(SortField::RetryCount),
            other => Err(RecordError::invalid_filter(format!(
                "sort field '{other}' is not one of created_at, updated_at, retry_count"
            ))),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub enum SortDirection {
    /// Sort in ascending order
    #[serde(rename = "asc", alias = "ascending")]
    Ascending,
    /// Sort in descending order
    #[default]
    #[serde(rename = "desc", alias = "descending")]
    Descending,
}

impl SortDirection {
    /// SQL keyword for this direction
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Ascending),
            "desc" | "descending" => Ok(SortDirection::Descending),
            other => Err(RecordError::invalid_filter(format!(
                "sort order '{other}' must be asc or desc"
            ))),
        }
    }
}

/// A resolved sort: field plus direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub struct SortSpec {
    /// Primary sort field
    pub field: SortField,
    /// Direction applied to the field and to the id tie-break
    pub direction: SortDirection,
}

impl SortSpec {
    /// Create a sort spec
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }
}

/// Filter dimensions a request can use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FilterDimension {
    /// Status set membership
    Status,
    /// Created-at range
    TimeRange,
    /// Created-at calendar date
    Date,
    /// Retry count range
    RetryRange,
    /// Metadata field equality
    Metadata,
    /// Payload field equality
    Payload,
}

/// Filter conditions; all dimensions are optional and AND-ed together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EventFilter {
    /// Match any of these statuses
    pub statuses: Vec<EventStatus>,
    /// Created at or after this instant
    pub created_from: Option<DateTime<Utc>>,
    /// Created at or before this instant
    pub created_to: Option<DateTime<Utc>>,
    /// Created on this UTC calendar date
    pub date: Option<NaiveDate>,
    /// At least this many retries
    pub min_retries: Option<u32>,
    /// At most this many retries
    pub max_retries: Option<u32>,
    /// Metadata key path to expected scalar value
    pub metadata: IndexMap<String, Value>,
    /// Payload key path to expected scalar value
    pub payload: IndexMap<String, Value>,
}

impl EventFilter {
    /// Dimensions present in this filter, in compilation order
    pub fn active_dimensions(&self) -> Vec<FilterDimension> {
        let mut dims = Vec::new();
        if !self.statuses.is_empty() {
            dims.push(FilterDimension::Status);
        }
        if self.created_from.is_some() || self.created_to.is_some() {
            dims.push(FilterDimension::TimeRange);
        }
        if self.date.is_some() {
            dims.push(FilterDimension::Date);
        }
        if self.min_retries.is_some() || self.max_retries.is_some() {
            dims.push(FilterDimension::RetryRange);
        }
        if !self.metadata.is_empty() {
            dims.push(FilterDimension::Metadata);
        }
        if !self.payload.is_empty() {
            dims.push(FilterDimension::Payload);
        }
        dims
    }

    /// Shape and range checks; does not count clause units
    pub fn validate(&self) -> RecordResult<()> {
        if let Some(from) = self.created_from {
            check_storable_bound("created_from", ceil_to_micros(from))?;
        }
        if let Some(to) = self.created_to {
            check_storable_bound("created_to", to)?;
        }
        if let Some(date) = self.date {
            let next_midnight = date
                .succ_opt()
                .map(|next| Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN)));
            let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
            if !is_storable(&start) || !next_midnight.is_some_and(|end| is_storable(&end)) {
                return Err(RecordError::invalid_filter(format!(
                    "date {date} is outside 0000-01-01..=9999-12-30"
                )));
            }
        }
        if let (Some(from), Some(to)) = (self.created_from, self.created_to) {
            if from > to {
                return Err(RecordError::invalid_filter(format!(
                    "created_from {from} is after created_to {to}"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_retries, self.max_retries) {
            if min > max {
                return Err(RecordError::invalid_filter(format!(
                    "min_retries {min} is greater than max_retries {max}"
                )));
            }
        }
        for (document, fields) in [("metadata", &self.metadata), ("payload", &self.payload)] {
            for (key, value) in fields {
                validate_key_path(document, key)?;
                if value.is_object() || value.is_array() {
                    return Err(RecordError::invalid_filter(format!(
                        "{document} filter '{key}' must compare against a scalar value"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_storable_bound(name: &str, ts: DateTime<Utc>) -> RecordResult<()> {
    if is_storable(&ts) {
        Ok(())
    } else {
        Err(RecordError::invalid_filter(format!(
            "{name} {ts} is outside years 0000-9999"
        )))
    }
}

/// Dotted key paths: non-empty segments of ASCII letters, digits, `_` and `-`
fn validate_key_path(document: &str, key: &str) -> RecordResult<()> {
    let valid = !key.is_empty()
        && key.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(RecordError::invalid_filter(format!(
            "{document} filter key '{key}' is not a valid key path"
        )))
    }
}

/// Filter, sort and page request for listing events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EventQuery {
    /// Filter conditions
    #[serde(flatten)]
    pub filter: EventFilter,
    /// Sort field (defaults to created_at)
    pub sort_by: Option<SortField>,
    /// Sort direction (defaults to desc)
    pub sort_order: Option<SortDirection>,
    /// Page size, 1..=1000 (defaults to 50)
    pub limit: Option<u32>,
    /// Rows to skip in offset mode
    pub offset: Option<u32>,
    /// Opaque cursor from a previous page; selects keyset mode
    pub cursor: Option<String>,
}

impl EventQuery {
    /// The sort this query resolves to
    pub fn sort(&self) -> SortSpec {
        SortSpec::new(
            self.sort_by.unwrap_or_default(),
            self.sort_order.unwrap_or_default(),
        )
    }

    /// The page size this query resolves to
    pub fn page_size(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Validate the whole request before compiling it
    pub fn validate(&self) -> RecordResult<()> {
        self.filter.validate()?;
        if let Some(limit) = self.limit {
            if limit == 0 || limit > MAX_PAGE_SIZE {
                return Err(RecordError::invalid_filter(format!(
                    "limit {limit} must be between 1 and {MAX_PAGE_SIZE}"
                )));
            }
        }
        if self.cursor.is_some() && self.offset.is_some() {
            return Err(RecordError::invalid_filter(
                "cursor and offset cannot be combined",
            ));
        }
        Ok(())
    }
}

/// JSON Schema of [`EventQuery`] for upstream request validators
pub fn query_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(EventQuery)
}

/// Query result with paging metadata
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryResult<T> {
    /// The actual results, in sort order
    pub items: Vec<T>,
    /// Total matching rows (offset mode only)
    pub total_count: Option<u64>,
    /// Whether another page may exist
    pub has_more: bool,
    /// Cursor for the next page, present iff the page was full
    pub next_cursor: Option<String>,
    /// Filter dimensions that were applied
    pub applied_filters: Vec<FilterDimension>,
    /// The sort that was applied
    pub sort: SortSpec,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl<T> QueryResult<T> {
    /// Map the items to a different type
    pub fn map<U, F>(self, f: F) -> QueryResult<U>
    where
        F: FnMut(T) -> U,
    {
        QueryResult {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            has_more: self.has_more,
            next_cursor: self.next_cursor,
            applied_filters: self.applied_filters,
            sort: self.sort,
            execution_time_ms: self.execution_time_ms,
        }
    }
}

/// Builder for event queries
#[derive(Debug, Default)]
pub struct QueryBuilder {
    query: EventQuery,
}

impl QueryBuilder {
    /// Create a new query builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a status (may be called repeatedly)
    pub fn status(mut self, status: EventStatus) -> Self {
        self.query.filter.statuses.push(status);
        self
    }

    /// Created at or after
    pub fn created_from(mut self, from: DateTime<Utc>) -> Self {
        self.query.filter.created_from = Some(from);
        self
    }

    /// Created at or before
    pub fn created_to(mut self, to: DateTime<Utc>) -> Self {
        self.query.filter.created_to = Some(to);
        self
    }

    /// Created on a calendar date
    pub fn on_date(mut self, date: NaiveDate) -> Self {
        self.query.filter.date = Some(date);
        self
    }

    /// Retry count within an inclusive range
    pub fn retries_between(mut self, min: u32, max: u32) -> Self {
        self.query.filter.min_retries = Some(min);
        self.query.filter.max_retries = Some(max);
        self
    }

    /// Metadata field equality
    pub fn metadata_eq(mut self, key: impl Into<String>, value: Value) -> Self {
        self.query.filter.metadata.insert(key.into(), value);
        self
    }

    /// Payload field equality
    pub fn payload_eq(mut self, key: impl Into<String>, value: Value) -> Self {
        self.query.filter.payload.insert(key.into(), value);
        self
    }

    /// Add sorting
    pub fn sort_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.query.sort_by = Some(field);
        self.query.sort_order = Some(direction);
        self
    }

    /// Set the limit
    pub fn limit(mut self, limit: u32) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Set the offset
    pub fn offset(mut self, offset: u32) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Continue after a cursor
    pub fn after_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.query.cursor = Some(cursor.into());
        self
    }

    /// Build the query
    pub fn build(self) -> EventQuery {
        self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_builder() {
        let query = QueryBuilder::new()
            .status(EventStatus::Failed)
            .status(EventStatus::Pending)
            .metadata_eq("source", json!("billing"))
            .sort_by(SortField::RetryCount, SortDirection::Ascending)
            .limit(10)
            .offset(20)
            .build();

        assert_eq!(query.filter.statuses.len(), 2);
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(20));
        assert_eq!(
            query.sort(),
            SortSpec::new(SortField::RetryCount, SortDirection::Ascending)
        );
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let query = EventQuery::default();
        assert_eq!(query.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(
            query.sort(),
            SortSpec::new(SortField::CreatedAt, SortDirection::Descending)
        );
        assert!(query.filter.active_dimensions().is_empty());
    }

    #[test]
    fn test_rejects_out_of_range_limits() {
        for limit in [0, MAX_PAGE_SIZE + 1] {
            let err = QueryBuilder::new().limit(limit).build().validate().unwrap_err();
            assert!(matches!(err, RecordError::InvalidFilter(_)), "limit {limit}");
        }
        assert!(QueryBuilder::new().limit(MAX_PAGE_SIZE).build().validate().is_ok());
    }

    #[test]
    fn test_rejects_cursor_with_offset() {
        let err = QueryBuilder::new()
            .offset(0)
            .after_cursor("abc")
            .build()
            .validate()
            .unwrap_err();
        assert!(matches!(err, RecordError::InvalidFilter(_)));
    }

    #[test]
    fn test_rejects_inverted_ranges() {
        let from = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let query = QueryBuilder::new().created_from(from).created_to(to).build();
        assert!(matches!(query.validate(), Err(RecordError::InvalidFilter(_))));

        let query = QueryBuilder::new().retries_between(3, 1).build();
        assert!(matches!(query.validate(), Err(RecordError::InvalidFilter(_))));
    }

    #[test]
    fn test_rejects_bounds_outside_storable_years() {
        let far = Utc.with_ymd_and_hms(10_000, 1, 1, 0, 0, 0).unwrap();
        for query in [
            QueryBuilder::new().created_from(far).build(),
            QueryBuilder::new().created_to(far).build(),
            QueryBuilder::new()
                .on_date(NaiveDate::from_ymd_opt(9999, 12, 31).unwrap())
                .build(),
        ] {
            assert!(matches!(query.validate(), Err(RecordError::InvalidFilter(_))));
        }

        // the last microsecond of 9999 would round up into year 10000
        let edge = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap()
            + chrono::Duration::nanoseconds(999_999_500);
        let query = QueryBuilder::new().created_from(edge).build();
        assert!(matches!(query.validate(), Err(RecordError::InvalidFilter(_))));

        let query = QueryBuilder::new()
            .on_date(NaiveDate::from_ymd_opt(9999, 12, 30).unwrap())
            .build();
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_field_filters() {
        for key in ["", "a..b", "a.", "name'; DROP TABLE events;--", "quo\"te"] {
            let query = QueryBuilder::new().payload_eq(key, json!(1)).build();
            assert!(
                matches!(query.validate(), Err(RecordError::InvalidFilter(_))),
                "key {key:?}"
            );
        }

        let query = QueryBuilder::new()
            .metadata_eq("tags", json!(["a"]))
            .build();
        assert!(matches!(query.validate(), Err(RecordError::InvalidFilter(_))));

        let query = QueryBuilder::new()
            .metadata_eq("customer.tier-level_2", json!("gold"))
            .payload_eq("flag", json!(null))
            .build();
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_sort_field_whitelist() {
        assert_eq!("createdAt".parse::<SortField>().unwrap(), SortField::CreatedAt);
        assert_eq!("retry_count".parse::<SortField>().unwrap(), SortField::RetryCount);
        assert!(matches!(
            "payload".parse::<SortField>(),
            Err(RecordError::InvalidFilter(_))
        ));
        assert_eq!("DESC".parse::<SortDirection>().unwrap(), SortDirection::Descending);
        assert!("sideways".parse::<SortDirection>().is_err());
    }

    #[test]
    fn test_query_deserializes_from_flat_json() {
        let query: EventQuery = serde_json::from_value(json!({
            "statuses": ["failed"],
            "min_retries": 1,
            "metadata": { "source": "billing" },
            "sort_by": "retryCount",
            "sort_order": "asc",
            "limit": 25
        }))
        .unwrap();

        assert_eq!(query.filter.statuses, vec![EventStatus::Failed]);
        assert_eq!(query.filter.min_retries, Some(1));
        assert_eq!(query.filter.metadata.get("source"), Some(&json!("billing")));
        assert_eq!(query.sort().field, SortField::RetryCount);
        assert_eq!(query.sort().direction, SortDirection::Ascending);
        assert_eq!(query.page_size(), 25);

        let unknown_sort = serde_json::from_value::<EventQuery>(json!({ "sort_by": "payload" }));
        assert!(unknown_sort.is_err());
    }

    #[test]
    fn test_active_dimensions_follow_compilation_order() {
        let query = QueryBuilder::new()
            .payload_eq("kind", json!("order"))
            .retries_between(0, 2)
            .status(EventStatus::Failed)
            .build();
        assert_eq!(
            query.filter.active_dimensions(),
            vec![
                FilterDimension::Status,
                FilterDimension::RetryRange,
                FilterDimension::Payload
            ]
        );
    }

    #[test]
    fn test_query_schema_lists_filter_fields() {
        let schema = serde_json::to_value(query_schema()).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        for field in ["statuses", "created_from", "date", "metadata", "cursor", "sort_by"] {
            assert!(properties.contains_key(field), "missing {field}");
        }
    }

    #[test]
    fn test_query_result_map() {
        let result = QueryResult {
            items: vec![1, 2, 3],
            total_count: Some(10),
            has_more: true,
            next_cursor: None,
            applied_filters: vec![FilterDimension::Status],
            sort: SortSpec::default(),
            execution_time_ms: 5,
        };

        let mapped = result.map(|x| x * 2);
        assert_eq!(mapped.items, vec![2, 4, 6]);
        assert_eq!(mapped.total_count, Some(10));
        assert!(mapped.has_more);
    }
}
