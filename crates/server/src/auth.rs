//! 代理鉴权
//!
//! 客户端接口使用 `server.api_keys`，管理接口使用 `server.admin_key`。
//! 密钥比较先做 sha256 再用常量时间比较，避免泄露长度和前缀信息。

use crate::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use poolcast_core::errors::{GatewayError, GatewayErrorCode};
use poolcast_core::models::CallerIdentity;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use subtle::ConstantTimeEq;

use crate::response::gateway_error_response;

/// 从请求中提取客户端提供的密钥
///
/// 依次检查 `Authorization: Bearer`、`x-api-key`、`x-goog-api-key` 和 `?key=`。
pub fn extract_client_key(headers: &HeaderMap, query_key: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")));

    bearer
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
        .or_else(|| headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()))
        .or(query_key)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// 常量时间比较两个密钥
pub fn key_matches(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.as_slice().ct_eq(b.as_slice()).into()
}

/// 调用方标识：密钥 sha256 的前 12 位
pub fn caller_fingerprint(key: &str) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    digest[..12].to_string()
}

/// 客户端 IP（优先取 X-Forwarded-For 的第一跳）
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// 客户端鉴权，返回调用方身份
///
/// 未配置 `api_keys` 时不鉴权，以客户端 IP 作为身份。
pub fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_key: Option<&str>,
    peer: Option<SocketAddr>,
) -> Result<CallerIdentity, GatewayError> {
    if state.api_keys.is_empty() {
        return Ok(CallerIdentity::ip(client_ip(headers, peer)));
    }

    let Some(key) = extract_client_key(headers, query_key) else {
        return Err(GatewayError::new(
            GatewayErrorCode::AuthenticationFailed,
            "缺少 API Key",
        ));
    };

    // 逐个比较，不提前退出
    let matched = state
        .api_keys
        .iter()
        .fold(false, |found, expected| key_matches(&key, expected) | found);
    if !matched {
        tracing::warn!(
            "[SERVER] API Key 无效: ip={}",
            client_ip(headers, peer)
        );
        return Err(GatewayError::new(
            GatewayErrorCode::AuthenticationFailed,
            "API Key 无效",
        ));
    }

    Ok(CallerIdentity::proxy_key(caller_fingerprint(&key)))
}

/// 管理接口鉴权中间件
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(admin_key) = state.admin_key.as_deref() else {
        return gateway_error_response(GatewayError::new(
            GatewayErrorCode::Forbidden,
            "管理接口未启用",
        ));
    };

    match extract_client_key(req.headers(), None) {
        Some(key) if key_matches(&key, admin_key) => next.run(req).await,
        Some(_) => gateway_error_response(GatewayError::new(
            GatewayErrorCode::AuthenticationFailed,
            "管理密钥无效",
        )),
        None => gateway_error_response(GatewayError::new(
            GatewayErrorCode::AuthenticationFailed,
            "缺少管理密钥",
        )),
    }
}
