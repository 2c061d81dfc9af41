//! Typed facades over the service client, one per downstream dependency
//!
//! The gateway stays agnostic to downstream payload shapes; facades only pin
//! down the path, method, cacheability and idempotence of each operation and
//! hand bodies through as opaque JSON.

use crate::clients::{CallRequest, ServiceClient, AUTH, EMBEDDINGS, GRAPH_SEARCH, INGESTION, TOOL_SERVER};
use crate::config::CacheSettings;
use crate::error::{GatewayError, Result};
use atlas_cache::CacheKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Identity attached to a request after token verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

fn sha256_hex(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// All downstream operations the REST surface needs
#[derive(Clone)]
pub struct Downstream {
    client: Arc<ServiceClient>,
    ttls: CacheSettings,
}

impl Downstream {
    pub fn new(client: Arc<ServiceClient>, ttls: CacheSettings) -> Self {
        Self { client, ttls }
    }

    pub fn client(&self) -> &Arc<ServiceClient> {
        &self.client
    }

    // ============= Auth =============

    /// Verify a bearer token against the auth service. Verification results
    /// are cached by token hash so the hot path rarely leaves the gateway.
    pub async fn verify_token(&self, token: &str, request_id: &str) -> Result<AuthContext> {
        let cache_key = CacheKey::auth_token(&sha256_hex(token));
        let request = CallRequest::post("/v1/verify", json!({ "token": token }))
            .idempotent()
            .cached(cache_key, self.ttls.auth_ttl());

        let response = match self.client.call(AUTH, request, request_id).await {
            Ok(response) => response,
            Err(GatewayError::Dependency { status, message, .. })
                if status == 401 || status == 403 =>
            {
                return Err(GatewayError::Unauthorized(message));
            }
            Err(other) => return Err(other),
        };

        serde_json::from_value(response.body.clone())
            .map_err(|e| GatewayError::Internal(format!("malformed auth response: {e}")))
    }

    // ============= Graph / Search =============

    /// Hybrid (keyword + graph) search
    pub async fn hybrid_search(&self, query: &str, limit: u32, request_id: &str) -> Result<Value> {
        let cache_key = CacheKey::search(&sha256_hex(&format!("hybrid:{query}:{limit}")));
        let request = CallRequest::post("/v1/search", json!({ "query": query, "limit": limit }))
            .idempotent()
            .cached(cache_key, self.ttls.search_ttl());

        let response = self.client.call(GRAPH_SEARCH, request, request_id).await?;
        Ok(response.body)
    }

    /// Vector search: embed the query, then search by the embedding
    pub async fn vector_search(&self, query: &str, limit: u32, request_id: &str) -> Result<Value> {
        let cache_key = CacheKey::search(&sha256_hex(&format!("vector:{query}:{limit}")));

        if let Some(cached) = self.client.cache().get::<Value>(&cache_key).await {
            return Ok(cached);
        }

        let embed = CallRequest::post("/v1/embed", json!({ "text": query })).idempotent();
        let embedding = self
            .client
            .call(EMBEDDINGS, embed, request_id)
            .await?
            .body["embedding"]
            .clone();

        let search = CallRequest::post(
            "/v1/search/vector",
            json!({ "embedding": embedding, "limit": limit }),
        )
        .idempotent()
        .cached(cache_key, self.ttls.search_ttl());

        let response = self.client.call(GRAPH_SEARCH, search, request_id).await?;
        Ok(response.body)
    }

    pub async fn get_entity(&self, entity_id: &str, request_id: &str) -> Result<Value> {
        let request = CallRequest::get(format!("/v1/entities/{entity_id}"))
            .cached(CacheKey::entity(entity_id), self.ttls.entity_ttl());

        let response = self.client.call(GRAPH_SEARCH, request, request_id).await?;
        Ok(response.body)
    }

    pub async fn get_entity_neighbors(&self, entity_id: &str, request_id: &str) -> Result<Value> {
        let request = CallRequest::get(format!("/v1/entities/{entity_id}/neighbors"))
            .cached(CacheKey::entity_neighbors(entity_id), self.ttls.entity_ttl());

        let response = self.client.call(GRAPH_SEARCH, request, request_id).await?;
        Ok(response.body)
    }

    // ============= Ingestion / Sources =============

    pub async fn list_sources(&self, owner_id: &str, request_id: &str) -> Result<Value> {
        let request = CallRequest::get(format!("/v1/sources?owner={owner_id}"))
            .cached(CacheKey::source_list(owner_id), self.ttls.default_ttl());

        let response = self.client.call(INGESTION, request, request_id).await?;
        Ok(response.body)
    }

    /// Create a source, then populate its cache entry and drop stale listings
    pub async fn create_source(&self, owner_id: &str, body: Value, request_id: &str) -> Result<Value> {
        let request = CallRequest::post("/v1/sources", body);
        let response = self.client.call(INGESTION, request, request_id).await?;

        if let Some(source_id) = response.body["id"].as_str() {
            self.client
                .cache()
                .write_through(
                    &CacheKey::source(source_id),
                    self.ttls.default_ttl(),
                    &response,
                )
                .await;
        }
        self.client
            .cache()
            .invalidate(&CacheKey::source_list(owner_id))
            .await;

        Ok(response.body)
    }

    pub async fn get_source(&self, source_id: &str, request_id: &str) -> Result<Value> {
        let request = CallRequest::get(format!("/v1/sources/{source_id}"))
            .cached(CacheKey::source(source_id), self.ttls.default_ttl());

        let response = self.client.call(INGESTION, request, request_id).await?;
        Ok(response.body)
    }

    /// Update in place; the response refreshes the cache entry write-through
    pub async fn update_source(&self, source_id: &str, body: Value, request_id: &str) -> Result<Value> {
        let request = CallRequest {
            method: reqwest::Method::PUT,
            path: format!("/v1/sources/{source_id}"),
            body: Some(body),
            cache: crate::clients::CachePolicy::Bypass,
            idempotent: false,
        }
        .write_through(CacheKey::source(source_id), self.ttls.default_ttl());

        let response = self.client.call(INGESTION, request, request_id).await?;
        Ok(response.body)
    }

    pub async fn delete_source(&self, source_id: &str, request_id: &str) -> Result<Value> {
        let request = CallRequest::delete(format!("/v1/sources/{source_id}"));
        let response = self.client.call(INGESTION, request, request_id).await?;

        // Drop the entity and every listing that may contain it
        self.client.cache().invalidate(&CacheKey::source_pattern()).await;

        Ok(response.body)
    }

    pub async fn trigger_sync(&self, source_id: &str, request_id: &str) -> Result<Value> {
        let request = CallRequest::post(format!("/v1/sync/{source_id}"), Value::Null);
        let response = self.client.call(INGESTION, request, request_id).await?;
        Ok(response.body)
    }

    pub async fn sync_status(&self, job_id: &str, request_id: &str) -> Result<Value> {
        let request = CallRequest::get(format!("/v1/sync/{job_id}/status"));
        let response = self.client.call(INGESTION, request, request_id).await?;
        Ok(response.body)
    }

    // ============= Tools =============

    pub async fn tool_capabilities(&self, request_id: &str) -> Result<Value> {
        let request = CallRequest::get("/v1/capabilities").cached(
            CacheKey::tool_capabilities(),
            self.ttls.capabilities_ttl(),
        );

        let response = self.client.call(TOOL_SERVER, request, request_id).await?;
        Ok(response.body)
    }

    /// Tool invocations are declared idempotent by the tool contract
    pub async fn invoke_tool(&self, tool: &str, args: Value, request_id: &str) -> Result<Value> {
        let request =
            CallRequest::post(format!("/v1/tools/{tool}/invoke"), json!({ "args": args }))
                .idempotent();

        let response = self.client.call(TOOL_SERVER, request, request_id).await?;
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hashes_are_stable_and_opaque() {
        let a = sha256_hex("bearer-token");
        let b = sha256_hex("bearer-token");
        let c = sha256_hex("other-token");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(!a.contains("bearer"));
    }

    #[test]
    fn auth_context_tolerates_missing_optional_fields() {
        let ctx: AuthContext =
            serde_json::from_value(json!({ "user_id": "u-1" })).expect("minimal context");

        assert_eq!(ctx.user_id, "u-1");
        assert!(ctx.email.is_none());
        assert!(ctx.roles.is_empty());
    }
}
