//! Entity enrichment.
//!
//! CDC snapshots may carry a narrower projection than the full entity, so
//! creates and updates always re-read canonical state from upstream before
//! touching the read model.

pub mod http;

pub use http::HttpEnrichmentClient;

use async_trait::async_trait;
use std::time::Duration;

use crate::models::{CatalogEntity, EntityKind};

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    InvalidResponse(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl EnrichmentError {
    /// Timeouts, connection failures, 5xx and 429 can clear on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            EnrichmentError::Timeout(_)
            | EnrichmentError::Connect(_)
            | EnrichmentError::Request(_) => true,
            EnrichmentError::Status { status, .. } => *status == 429 || *status >= 500,
            EnrichmentError::InvalidResponse(_) => false,
        }
    }
}

/// Source of canonical entity state.
///
/// `Ok(None)` means the entity no longer exists upstream, which is a
/// legitimate terminal outcome rather than an error.
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    async fn fetch_by_id(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<CatalogEntity>, EnrichmentError>;
}
