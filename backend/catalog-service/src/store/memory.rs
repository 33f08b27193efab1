use async_trait::async_trait;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

use super::{ReadModelStore, StoreError};
use crate::models::{CatalogEntity, Pagination, SearchQuery, SortDirection, SortField};

/// Read model held in a sharded concurrent map.
///
/// Writes to different ids never contend on the same lock; writes to the
/// same id serialize on its shard.
#[derive(Debug, Default)]
pub struct InMemoryReadModelStore {
    records: DashMap<String, CatalogEntity>,
}

impl InMemoryReadModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ReadModelStore for InMemoryReadModelStore {
    async fn upsert(&self, entity: CatalogEntity) -> Result<(), StoreError> {
        if entity.id.trim().is_empty() {
            return Err(StoreError::Rejected("entity id is empty".to_string()));
        }
        debug!(entity_id = %entity.id, "Upserting read-model record");
        self.records.insert(entity.id.clone(), entity);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        if self.records.remove(id).is_some() {
            debug!(entity_id = id, "Deleted read-model record");
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogEntity>, StoreError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_all_by_ids(&self, ids: &[String]) -> Result<Vec<CatalogEntity>, StoreError> {
        let mut seen = HashSet::with_capacity(ids.len());
        Ok(ids
            .iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| self.records.get(id).map(|entry| entry.value().clone()))
            .collect())
    }

    async fn find_all(&self, query: &SearchQuery) -> Result<Pagination<CatalogEntity>, StoreError> {
        let terms = query
            .terms
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        let mut matches: Vec<CatalogEntity> = self
            .records
            .iter()
            .filter(|entry| match &terms {
                Some(terms) => entry.value().name.to_lowercase().contains(terms),
                None => true,
            })
            .map(|entry| entry.value().clone())
            .collect();

        matches.sort_by(|a, b| {
            let ordering = compare(a, b, query.sort).then_with(|| a.id.cmp(&b.id));
            match query.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(query.page.saturating_mul(query.per_page))
            .take(query.per_page)
            .collect();

        Ok(Pagination {
            current_page: query.page,
            per_page: query.per_page,
            total,
            items,
        })
    }
}

fn compare(a: &CatalogEntity, b: &CatalogEntity, field: SortField) -> Ordering {
    match field {
        SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    }
}
