//! Read-model store.
//!
//! The only writer of the local catalog. Writes are keyed by entity id and
//! full-replace, so applying the same change twice leaves the same state.

mod memory;

pub use memory::InMemoryReadModelStore;

use async_trait::async_trait;

use crate::models::{CatalogEntity, Pagination, SearchQuery};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("entity rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[async_trait]
pub trait ReadModelStore: Send + Sync {
    /// Insert or overwrite the record for `entity.id`.
    async fn upsert(&self, entity: CatalogEntity) -> Result<(), StoreError>;

    /// Remove the record for `id`. Absent ids are a no-op.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogEntity>, StoreError>;

    /// Records for the given ids, skipping unknown ones.
    async fn find_all_by_ids(&self, ids: &[String]) -> Result<Vec<CatalogEntity>, StoreError>;

    async fn find_all(&self, query: &SearchQuery) -> Result<Pagination<CatalogEntity>, StoreError>;
}
