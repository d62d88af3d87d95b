//! Where the relay keeps readings.
//!
//! Rows are only ever appended. Reads return them in insertion order, which is
//! the order the relay received them in, not necessarily production order.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use serde::Deserialize;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::telemetry::StoredReading;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Optional calendar filters, matched against the UTC timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ReadingFilter {
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hour: Option<u32>,
}

impl ReadingFilter {
    pub fn validate(&self) -> Result<(), String> {
        check("month", self.month, 1, 12)?;
        check("day", self.day, 1, 31)?;
        check("hour", self.hour, 0, 23)
    }

    pub fn matches(&self, row: &StoredReading) -> bool {
        let ts = row.timestamp;
        self.month.map_or(true, |m| ts.month() == m)
            && self.day.map_or(true, |d| ts.day() == d)
            && self.hour.map_or(true, |h| ts.hour() == h)
    }
}

fn check(name: &str, value: Option<u32>, min: u32, max: u32) -> Result<(), String> {
    match value {
        Some(v) if v < min || v > max => Err(format!("{} must be between {} and {}", name, min, max)),
        _ => Ok(()),
    }
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn insert(&self, row: &StoredReading) -> Result<(), StoreError>;

    async fn fetch(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>, StoreError>;

    async fn latest(&self) -> Result<Option<StoredReading>, StoreError> {
        Ok(self.fetch(&ReadingFilter::default()).await?.pop())
    }
}

/// Opens the configured store once for the life of the process.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn ReadingStore>, StoreError> {
    match config {
        StoreConfig::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::default()))
        }
        StoreConfig::Redis { url, key } => Ok(Arc::new(RedisStore::connect(url, key).await?)),
    }
}
