//! 管理接口
//!
//! 凭证池状态查看、启用/禁用凭证，以及响应缓存管理。
//! 所有路由都经过 `require_admin` 中间件。

use crate::response::{invalid_request_response, not_found_response};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use poolcast_core::cache::{CacheEntrySummary, CacheStats, Fingerprint};
use poolcast_core::credential::{Credential, PoolError, PoolStatus};
use serde::{Deserialize, Serialize};

/// 凭证视图（密钥已脱敏）
#[derive(Debug, Serialize)]
pub struct CredentialView {
    #[serde(flatten)]
    pub credential: Credential,
    pub in_flight: usize,
}

#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    pub pool: PoolStatus,
    pub credentials: Vec<CredentialView>,
}

/// 禁用请求
#[derive(Debug, Default, Deserialize)]
pub struct DisableRequest {
    pub reason: Option<String>,
}

/// 缓存清理参数
#[derive(Debug, Default, Deserialize)]
pub struct CacheScopeQuery {
    pub scope: Option<String>,
}

/// 续期请求
#[derive(Debug, Default, Deserialize)]
pub struct TouchRequest {
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CacheListResponse {
    pub count: usize,
    pub entries: Vec<CacheEntrySummary>,
}

fn pool_error_response(error: PoolError) -> Response {
    match error {
        PoolError::CredentialNotFound(id) => not_found_response(format!("凭证不存在: {id}")),
        other => invalid_request_response(other.to_string()),
    }
}

fn parse_fingerprint(value: &str) -> Result<Fingerprint, Response> {
    Fingerprint::parse(value).ok_or_else(|| invalid_request_response("无效的缓存指纹"))
}

/// GET /admin/credentials
pub async fn list_credentials(State(state): State<AppState>) -> Json<CredentialsResponse> {
    let pool = state.dispatcher.pool();
    let credentials = pool
        .all()
        .into_iter()
        .map(|credential| CredentialView {
            in_flight: credential.in_flight(),
            credential,
        })
        .collect();

    Json(CredentialsResponse {
        pool: pool.status(),
        credentials,
    })
}

/// POST /admin/credentials/:id/enable
pub async fn enable_credential(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.dispatcher.pool().enable(&id) {
        Ok(()) => {
            tracing::info!("[SERVER] 管理员启用凭证: id={}", id);
            Json(serde_json::json!({"id": id, "status": "active"})).into_response()
        }
        Err(e) => pool_error_response(e),
    }
}

/// POST /admin/credentials/:id/disable
pub async fn disable_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<DisableRequest>>,
) -> Response {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "管理员禁用".to_string());

    match state.dispatcher.pool().disable(&id, reason.clone()) {
        Ok(()) => {
            tracing::info!("[SERVER] 管理员禁用凭证: id={}, reason={}", id, reason);
            Json(serde_json::json!({"id": id, "status": "disabled", "reason": reason}))
                .into_response()
        }
        Err(e) => pool_error_response(e),
    }
}

/// GET /admin/cache
pub async fn list_cache(State(state): State<AppState>) -> Json<CacheListResponse> {
    let entries = state.dispatcher.cache().list();
    Json(CacheListResponse {
        count: entries.len(),
        entries,
    })
}

/// GET /admin/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.dispatcher.cache().stats())
}

/// DELETE /admin/cache?scope=..（不带 scope 时清空全部）
pub async fn clear_cache(
    State(state): State<AppState>,
    Query(query): Query<CacheScopeQuery>,
) -> Json<serde_json::Value> {
    let cache = state.dispatcher.cache();
    let removed = match query.scope.as_deref() {
        Some(scope) => cache.invalidate_all(scope),
        None => cache.clear(),
    };
    tracing::info!(
        "[CACHE] 管理员清理缓存: scope={:?}, removed={}",
        query.scope,
        removed
    );
    Json(serde_json::json!({ "removed": removed }))
}

/// DELETE /admin/cache/:fingerprint
pub async fn invalidate_cache_entry(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Response {
    let fingerprint = match parse_fingerprint(&fingerprint) {
        Ok(fp) => fp,
        Err(response) => return response,
    };
    if state.dispatcher.cache().invalidate(&fingerprint) {
        Json(serde_json::json!({ "removed": 1 })).into_response()
    } else {
        not_found_response("缓存条目不存在")
    }
}

/// POST /admin/cache/:fingerprint/touch
pub async fn touch_cache_entry(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
    body: Option<Json<TouchRequest>>,
) -> Response {
    let fingerprint = match parse_fingerprint(&fingerprint) {
        Ok(fp) => fp,
        Err(response) => return response,
    };
    let ttl_secs = body.and_then(|Json(req)| req.ttl_secs);

    match state.dispatcher.cache().touch(&fingerprint, ttl_secs) {
        Ok(true) => {
            Json(serde_json::json!({ "fingerprint": fingerprint, "touched": true })).into_response()
        }
        Ok(false) => not_found_response("缓存条目不存在"),
        Err(e) => invalid_request_response(e.to_string()),
    }
}
