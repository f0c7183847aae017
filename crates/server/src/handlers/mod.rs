//! HTTP 请求处理器模块
//!
//! 按协议方言拆分：OpenAI 兼容接口、原生接口和管理接口。

pub mod admin;
pub mod native;
pub mod openai;

pub use admin::*;
pub use native::*;
pub use openai::*;

use crate::response::CACHE_CONTROL_HEADER;
use axum::http::HeaderMap;
use poolcast_core::models::CacheMode;
use serde::Deserialize;

/// 客户端可通过 `?key=` 传递密钥
#[derive(Debug, Default, Deserialize)]
pub struct KeyQuery {
    pub key: Option<String>,
}

/// 从请求头解析缓存控制
pub fn cache_mode_from_headers(headers: &HeaderMap) -> CacheMode {
    match headers
        .get(CACHE_CONTROL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    {
        Some(v) if v.eq_ignore_ascii_case("bypass") || v.eq_ignore_ascii_case("no-store") => {
            CacheMode::Bypass
        }
        _ => CacheMode::Default,
    }
}

/// 健康检查
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod handler_tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cache_mode_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(cache_mode_from_headers(&headers), CacheMode::Default);
        headers.insert(CACHE_CONTROL_HEADER, HeaderValue::from_static("BYPASS"));
        assert_eq!(cache_mode_from_headers(&headers), CacheMode::Bypass);
        headers.insert(CACHE_CONTROL_HEADER, HeaderValue::from_static("whatever"));
        assert_eq!(cache_mode_from_headers(&headers), CacheMode::Default);
    }
}
