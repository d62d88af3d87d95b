use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ReadingFilter, ReadingStore};
use crate::error::StoreError;
use crate::telemetry::StoredReading;

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<StoredReading>>,
}

impl MemoryStore {
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert(&self, row: &StoredReading) -> Result<(), StoreError> {
        self.rows.write().await.push(row.clone());
        Ok(())
    }

    async fn fetch(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn latest(&self) -> Result<Option<StoredReading>, StoreError> {
        Ok(self.rows.read().await.last().cloned())
    }
}
