//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::{CacheEngine, EntryInfo};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    DeleteResponse, GetResponse, HasResponse, HealthResponse, KeysResponse, SetRequest,
    SetResponse, StatsResponse, TagDeleteResponse, TagResponse, TouchRequest, TouchResponse,
};

/// Application state shared across all handlers.
///
/// The engine synchronizes internally, so handlers share a cloned handle.
#[derive(Clone)]
pub struct AppState {
    pub engine: CacheEngine,
}

impl AppState {
    pub fn new(engine: CacheEngine) -> Self {
        Self { engine }
    }

    /// Builds the engine described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let engine = CacheEngine::new(config.cache.clone()).await?;
        Ok(Self::new(engine))
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value with optional TTL and tags.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let options = req.options()?;
    let stored = state.engine.set(&req.key, req.value, options).await?;

    Ok(Json(SetResponse::new(req.key, stored)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.engine.get(&key).await? {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for GET /has/:key
pub async fn has_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<HasResponse>> {
    let exists = state.engine.has(&key).await?;
    Ok(Json(HasResponse { key, exists }))
}

/// Handler for GET /meta/:key
pub async fn metadata_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<EntryInfo>> {
    state
        .engine
        .metadata(&key)
        .await?
        .map(Json)
        .ok_or(CacheError::NotFound(key))
}

/// Handler for DELETE /del/:key
///
/// Deleting an absent key succeeds with `deleted: false`.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let deleted = state.engine.delete(&key).await?;
    Ok(Json(DeleteResponse::new(key, deleted)))
}

/// Handler for POST /touch/:key
///
/// The body is optional; without one the entry keeps its TTL.
pub async fn touch_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<TouchRequest>>,
) -> Result<Json<TouchResponse>> {
    let ttl = match body {
        Some(Json(req)) => req.ttl()?,
        None => None,
    };
    let touched = state.engine.touch(&key, ttl).await?;
    Ok(Json(TouchResponse { key, touched }))
}

/// Handler for GET /keys
pub async fn keys_handler(State(state): State<AppState>) -> Result<Json<KeysResponse>> {
    Ok(Json(state.engine.keys().await?.into()))
}

/// Handler for GET /tags/:tag
pub async fn get_tag_handler(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<TagResponse>> {
    let entries = state.engine.get_by_tag(&tag).await?;
    Ok(Json(TagResponse::new(tag, entries)))
}

/// Handler for DELETE /tags/:tag
pub async fn delete_tag_handler(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<TagDeleteResponse>> {
    let deleted = state.engine.delete_by_tag(&tag).await?;
    Ok(Json(TagDeleteResponse { tag, deleted }))
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<KeysResponse>> {
    state.engine.clear().await?;
    Ok(Json(KeysResponse::from(Vec::new())))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    Ok(Json(state.engine.stats().await?.into()))
}

/// Handler for POST /stats/reset
pub async fn reset_stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    state.engine.reset_stats().await?;
    Ok(Json(state.engine.stats().await?.into()))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::models::TtlInput;
    use serde_json::json;
    use std::time::Duration;

    async fn test_state() -> AppState {
        let engine = CacheEngine::new(CacheConfig::new().with_check_interval(Duration::ZERO))
            .await
            .unwrap();
        AppState::new(engine)
    }

    fn set_request(key: &str, value: serde_json::Value) -> SetRequest {
        SetRequest {
            key: key.to_string(),
            value,
            ttl: None,
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_set_and_get_handler() {
        let state = test_state().await;

        let result = set_handler(State(state.clone()), Json(set_request("test_key", json!("test_value")))).await;
        assert!(result.unwrap().stored);

        let response = get_handler(State(state.clone()), Path("test_key".to_string()))
            .await
            .unwrap();
        assert_eq!(response.value, json!("test_value"));
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let state = test_state().await;

        let result = get_handler(State(state), Path("nonexistent".to_string())).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let state = test_state().await;
        set_handler(State(state.clone()), Json(set_request("to_delete", json!(1))))
            .await
            .unwrap();

        let response = delete_handler(State(state.clone()), Path("to_delete".to_string()))
            .await
            .unwrap();
        assert!(response.deleted);

        let response = delete_handler(State(state.clone()), Path("to_delete".to_string()))
            .await
            .unwrap();
        assert!(!response.deleted);

        let result = get_handler(State(state), Path("to_delete".to_string())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tag_handlers() {
        let state = test_state().await;
        let mut req = set_request("u:1", json!({"name": "ada"}));
        req.tags = vec!["users".to_string()];
        set_handler(State(state.clone()), Json(req)).await.unwrap();

        let response = get_tag_handler(State(state.clone()), Path("users".to_string()))
            .await
            .unwrap();
        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.entries[0].key, "u:1");

        let response = delete_tag_handler(State(state.clone()), Path("users".to_string()))
            .await
            .unwrap();
        assert!(response.deleted);

        let response = has_handler(State(state), Path("u:1".to_string()))
            .await
            .unwrap();
        assert!(!response.exists);
    }

    #[tokio::test]
    async fn test_touch_handler_with_ttl() {
        let state = test_state().await;
        set_handler(State(state.clone()), Json(set_request("k", json!(1))))
            .await
            .unwrap();

        let body = TouchRequest {
            ttl: Some(TtlInput::Text("10s".to_string())),
        };
        let response = touch_handler(State(state.clone()), Path("k".to_string()), Some(Json(body)))
            .await
            .unwrap();
        assert!(response.touched);

        let info = metadata_handler(State(state), Path("k".to_string()))
            .await
            .unwrap();
        assert!(info.ttl_remaining_ms.unwrap() <= 10_000);
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let state = test_state().await;

        let response = stats_handler(State(state)).await.unwrap();
        assert_eq!(response.hits, 0);
        assert_eq!(response.misses, 0);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }

    #[tokio::test]
    async fn test_set_invalid_request() {
        let state = test_state().await;

        let result = set_handler(State(state.clone()), Json(set_request("", json!("value")))).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));

        let mut req = set_request("k", json!(1));
        req.ttl = Some(TtlInput::Text("whenever".to_string()));
        let result = set_handler(State(state), Json(req)).await;
        assert!(matches!(result, Err(CacheError::InvalidDuration { .. })));
    }
}
