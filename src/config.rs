// Copyright 2025 Cowboy AI, LLC.

//! Configuration for the event record store

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the SQLite database lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseLocation {
    /// Private in-memory database, lost when the store is dropped
    InMemory,
    /// Database file on disk
    File(PathBuf),
}

/// Settings for the offset-mode total count cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountCacheConfig {
    /// How long a cached total stays valid (0 = cache disabled)
    pub ttl_seconds: u64,
    /// Maximum number of distinct predicates kept
    pub capacity: usize,
}

impl Default for CountCacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 0,
            capacity: 256,
        }
    }
}

impl CountCacheConfig {
    /// Whether totals should be cached at all
    pub fn is_enabled(&self) -> bool {
        self.ttl_seconds > 0 && self.capacity > 0
    }

    /// TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Configuration for the SQLite event record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordStoreConfig {
    /// Database location
    pub database: DatabaseLocation,
    /// How long SQLite waits on a locked database before failing
    pub busy_timeout_ms: u64,
    /// Offset-mode total count cache
    pub count_cache: CountCacheConfig,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            database: DatabaseLocation::InMemory,
            busy_timeout_ms: 5_000,
            count_cache: CountCacheConfig::default(),
        }
    }
}

impl RecordStoreConfig {
    /// Config for a private in-memory database
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Config for a database file
    pub fn with_database_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            database: DatabaseLocation::File(path.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// Enable the count cache
    pub fn with_count_cache(mut self, ttl_seconds: u64, capacity: usize) -> Self {
        self.count_cache = CountCacheConfig {
            ttl_seconds,
            capacity,
        };
        self
    }

    /// Busy timeout as a duration
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
