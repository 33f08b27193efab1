//! Catalog domain types shared by the CDC pipeline, the enrichment client
//! and the read-model store.
use chrono::{DateTime, Utc};
use serde::de::{Deserializer, Error as DeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Entity stream handled by a pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Category,
    Genre,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::Genre => "genre",
        }
    }

    /// Collection segment on the enrichment endpoint (`/{segment}/{id}`).
    pub fn resource_path(&self) -> &'static str {
        match self {
            EntityKind::Category => "categories",
            EntityKind::Genre => "genres",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical entity state, as served by the enrichment endpoint and
/// persisted by the read-model store.
///
/// Always stored wholesale: a newer snapshot replaces the previous one,
/// fields are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntity {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "is_active")]
    pub active: bool,
    /// Category ids (genres only; empty for categories)
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "deletedAt")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CatalogEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            active: true,
            categories: BTreeSet::new(),
            created_at: None,
            updated_at: None,
            deleted_at: None,
        }
    }
}

/// Sort key for read-model listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Name,
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Listing query over a read model. Pages are 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub page: usize,
    pub per_page: usize,
    pub terms: Option<String>,
    pub sort: SortField,
    pub direction: SortDirection,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            page: 0,
            per_page: 10,
            terms: None,
            sort: SortField::Name,
            direction: SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination<T> {
    pub current_page: usize,
    pub per_page: usize,
    pub total: usize,
    pub items: Vec<T>,
}

/// Accept ids as JSON strings or integers; Debezium emits numeric keys for
/// integer primary keys.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s),
        Value::String(_) => Err(DeError::custom("entity id is empty")),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(DeError::custom(format!(
            "entity id must be a string or integer, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_from_enrichment_payload() {
        let entity: CatalogEntity = serde_json::from_value(json!({
            "id": "42",
            "name": "Drama",
            "active": true,
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(entity.id, "42");
        assert_eq!(entity.name, "Drama");
        assert!(entity.active);
        assert!(entity.categories.is_empty());
        assert!(entity.created_at.is_some());
        assert!(entity.deleted_at.is_none());
    }

    #[test]
    fn test_genre_with_camel_case_timestamps_and_numeric_id() {
        let entity: CatalogEntity = serde_json::from_value(json!({
            "id": 7,
            "name": "Action",
            "is_active": false,
            "categories": ["1", "2", "2"],
            "updatedAt": "2024-02-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(entity.id, "7");
        assert!(!entity.active);
        assert_eq!(entity.categories.len(), 2);
        assert!(entity.updated_at.is_some());
    }

    #[test]
    fn test_blank_id_rejected() {
        let result = serde_json::from_value::<CatalogEntity>(json!({"id": " ", "name": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_entity_kind_paths() {
        assert_eq!(EntityKind::Category.resource_path(), "categories");
        assert_eq!(EntityKind::Genre.resource_path(), "genres");
        assert_eq!(EntityKind::Genre.to_string(), "genre");
    }
}
