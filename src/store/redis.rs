//! # Redis
//!
//! Readings live in one Redis list, one JSON document per element. `RPUSH`
//! appends, `LRANGE 0 -1` reads everything back in insertion order. Filtering
//! happens client-side; the collection is small enough for that.
use async_trait::async_trait;
use ::redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{info, warn};

use super::{ReadingFilter, ReadingStore};
use crate::error::StoreError;
use crate::telemetry::StoredReading;

pub struct RedisStore {
    connection: ConnectionManager,
    key: String,
}

impl RedisStore {
    /// Fails if the server cannot be reached at startup. Later failures are
    /// per-command; the connection manager reconnects on its own.
    pub async fn connect(url: &str, key: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        info!("Connected to Redis, storing readings under {}", key);

        Ok(RedisStore {
            connection,
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl ReadingStore for RedisStore {
    async fn insert(&self, row: &StoredReading) -> Result<(), StoreError> {
        let document = serde_json::to_string(row)?;
        let mut connection = self.connection.clone();
        let _: () = connection.rpush(&self.key, document).await?;
        Ok(())
    }

    async fn fetch(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>, StoreError> {
        let mut connection = self.connection.clone();
        let documents: Vec<String> = connection.lrange(&self.key, 0, -1).await?;
        Ok(decode_rows(&documents)
            .into_iter()
            .filter(|row| filter.matches(row))
            .collect())
    }

    async fn latest(&self) -> Result<Option<StoredReading>, StoreError> {
        let mut connection = self.connection.clone();
        let document: Option<String> = connection.lindex(&self.key, -1).await?;
        Ok(document.and_then(|d| decode_rows(std::slice::from_ref(&d)).pop()))
    }
}

/// Skips (and logs) documents that no longer decode.
fn decode_rows(documents: &[String]) -> Vec<StoredReading> {
    documents
        .iter()
        .filter_map(|document| match serde_json::from_str(document) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("Skipping undecodable row: {}", e);
                None
            }
        })
        .collect()
}
