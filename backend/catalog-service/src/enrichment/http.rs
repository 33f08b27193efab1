use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use resilience::timeout::{with_deadline, TimeoutError};
use std::time::Duration;
use tracing::{debug, warn};

use super::{EnrichmentClient, EnrichmentError};
use crate::models::{CatalogEntity, EntityKind};

/// Longest response body echoed back into an error message
const MAX_ERROR_BODY: usize = 512;

/// Largest entity document accepted from upstream
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Enrichment over HTTP: `GET {base_url}/{categories|genres}/{id}`.
pub struct HttpEnrichmentClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    timeout: Duration,
}

impl HttpEnrichmentClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EnrichmentError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| EnrichmentError::Request(e.to_string()))?;

        Ok(Self::with_client(client, base_url, api_token, timeout))
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            api_token: api_token.filter(|t| !t.is_empty()),
            timeout,
        }
    }

    pub fn endpoint(&self, kind: EntityKind, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, kind.resource_path(), id)
    }

    async fn request(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<CatalogEntity>, EnrichmentError> {
        let url = self.endpoint(kind, id);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!(%kind, entity_id = id, "Entity not found upstream");
            return Ok(None);
        }

        if !status.is_success() {
            let (body, _) = read_capped(response, MAX_ERROR_BODY).await?;
            return Err(EnrichmentError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        if let Some(length) = response.content_length().filter(|len| *len > MAX_BODY_BYTES as u64) {
            return Err(oversized(length));
        }
        let (body, truncated) = read_capped(response, MAX_BODY_BYTES).await?;
        if truncated {
            return Err(oversized(body.len() as u64));
        }

        let entity: CatalogEntity = serde_json::from_slice(&body)
            .map_err(|e| EnrichmentError::InvalidResponse(e.to_string()))?;

        if entity.id != id {
            return Err(EnrichmentError::InvalidResponse(format!(
                "requested id {} but upstream returned {}",
                id, entity.id
            )));
        }

        Ok(Some(entity))
    }
}

#[async_trait]
impl EnrichmentClient for HttpEnrichmentClient {
    async fn fetch_by_id(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<CatalogEntity>, EnrichmentError> {
        match with_deadline(self.timeout, self.request(kind, id)).await {
            Ok(entity) => Ok(entity),
            Err(TimeoutError::Elapsed(elapsed)) => {
                warn!(%kind, entity_id = id, timeout = ?elapsed.0, "Enrichment request timed out");
                Err(EnrichmentError::Timeout(elapsed.0))
            }
            Err(TimeoutError::Failed(e)) => Err(e),
        }
    }
}

/// Read at most `limit` bytes of the body; the flag is set when more was sent.
async fn read_capped(mut response: Response, limit: usize) -> Result<(Vec<u8>, bool), EnrichmentError> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(map_transport_error)? {
        let room = limit - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

fn oversized(length: u64) -> EnrichmentError {
    EnrichmentError::InvalidResponse(format!(
        "response body of at least {} bytes exceeds the {} byte limit",
        length, MAX_BODY_BYTES
    ))
}

fn map_transport_error(err: reqwest::Error) -> EnrichmentError {
    if err.is_timeout() {
        EnrichmentError::Request(format!("timeout: {}", err))
    } else if err.is_connect() {
        EnrichmentError::Connect(err.to_string())
    } else {
        EnrichmentError::Request(err.to_string())
    }
}
