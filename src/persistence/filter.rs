// Copyright 2025 Cowboy AI, LLC.

//! Filter compilation
//!
//! Turns an [`EventFilter`] into a parameterized SQL predicate. Clauses are
//! emitted in a fixed order (status, time range, date, retries, metadata,
//! payload) and every value travels as a bound parameter; the only text that
//! reaches the SQL string is column names and placeholders.

use chrono::{Days, NaiveDate, NaiveTime, TimeZone, Utc};
use rusqlite::types::{ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{RecordError, RecordResult};
use crate::events::{ceil_to_micros, to_storage_timestamp};
use crate::persistence::query_support::{EventFilter, FilterDimension};

/// Maximum clause units a single filter may use
pub const MAX_FILTER_UNITS: usize = 10;

/// A bound SQL parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlParam {
    /// Text value
    Text(String),
    /// Integer value
    Integer(i64),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlParam::Text(s) => s.to_sql(),
            SqlParam::Integer(i) => i.to_sql(),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<u32> for SqlParam {
    fn from(value: u32) -> Self {
        SqlParam::Integer(i64::from(value))
    }
}

/// An AND of SQL clauses plus the parameters they bind, in placeholder order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPredicate {
    clauses: Vec<String>,
    params: Vec<SqlParam>,
    applied: Vec<FilterDimension>,
}

impl CompiledPredicate {
    /// Predicate matching every row
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Append a clause and the parameters for its placeholders
    pub(crate) fn push(
        &mut self,
        clause: impl Into<String>,
        params: impl IntoIterator<Item = SqlParam>,
    ) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    /// The individual clauses
    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }

    /// Bound parameters in placeholder order
    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    /// Filter dimensions that contributed clauses
    pub fn applied(&self) -> &[FilterDimension] {
        &self.applied
    }

    /// `WHERE ...` fragment, or an empty string when nothing filters
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    /// Stable key identifying this predicate, used for count caching
    pub fn cache_key(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        format!("{}|{}", self.where_sql(), params)
    }
}

/// Compiles filter requests into predicates
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterCompiler;

impl FilterCompiler {
    /// Count the clause units a filter uses
    ///
    /// Each status value and each field-equality pair is one unit; every
    /// other active dimension is one unit regardless of how many bounds it has.
    pub fn clause_units(filter: &EventFilter) -> usize {
        let mut units = filter.statuses.len() + filter.metadata.len() + filter.payload.len();
        if filter.created_from.is_some() || filter.created_to.is_some() {
            units += 1;
        }
        if filter.date.is_some() {
            units += 1;
        }
        if filter.min_retries.is_some() || filter.max_retries.is_some() {
            units += 1;
        }
        units
    }

    /// Compile a filter into a predicate
    pub fn compile(filter: &EventFilter) -> RecordResult<CompiledPredicate> {
        let units = Self::clause_units(filter);
        if units > MAX_FILTER_UNITS {
            return Err(RecordError::FilterCountExceeded {
                units,
                max: MAX_FILTER_UNITS,
            });
        }

        let mut predicate = CompiledPredicate::match_all();

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            predicate.push(
                format!("status IN ({placeholders})"),
                filter.statuses.iter().map(|s| SqlParam::from(s.as_str())),
            );
        }

        if let Some(from) = filter.created_from {
            let from = ceil_to_micros(from);
            predicate.push("created_at >= ?", [SqlParam::from(to_storage_timestamp(&from))]);
        }
        if let Some(to) = filter.created_to {
            predicate.push("created_at <= ?", [SqlParam::from(to_storage_timestamp(&to))]);
        }

        if let Some(date) = filter.date {
            let (start, end) = day_bounds(date)?;
            predicate.push("(created_at >= ? AND created_at < ?)", [start, end]);
        }

        if let Some(min) = filter.min_retries {
            predicate.push("retry_count >= ?", [SqlParam::from(min)]);
        }
        if let Some(max) = filter.max_retries {
            predicate.push("retry_count <= ?", [SqlParam::from(max)]);
        }

        for (key, value) in &filter.metadata {
            predicate.push("(metadata -> ?) = ?", field_params(key, value)?);
        }
        for (key, value) in &filter.payload {
            predicate.push("(payload -> ?) = ?", field_params(key, value)?);
        }

        predicate.applied = filter.active_dimensions();
        Ok(predicate)
    }
}

/// Half-open `[start, next day start)` bounds of a UTC calendar date
fn day_bounds(date: NaiveDate) -> RecordResult<(SqlParam, SqlParam)> {
    let next = date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| RecordError::invalid_filter(format!("date {date} is out of range")))?;
    let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    let end = Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN));
    Ok((
        SqlParam::from(to_storage_timestamp(&start)),
        SqlParam::from(to_storage_timestamp(&end)),
    ))
}

/// JSON path and JSON text parameters for one field-equality clause
fn field_params(key: &str, value: &Value) -> RecordResult<[SqlParam; 2]> {
    Ok([
        SqlParam::from(json_path(key)),
        SqlParam::from(serde_json::to_string(value)?),
    ])
}

/// `a.b` becomes `$."a"."b"`
fn json_path(key: &str) -> String {
    key.split('.').fold(String::from("$"), |mut path, segment| {
        path.push_str(".\"");
        path.push_str(segment);
        path.push('"');
        path
    })
}
