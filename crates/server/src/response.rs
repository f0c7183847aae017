//! 响应构建

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::stream;
use poolcast_core::errors::{GatewayError, GatewayErrorCode, GatewayErrorResponse};
use poolcast_processor::{DispatchError, DispatchResponse};

/// 请求级缓存控制头
pub const CACHE_CONTROL_HEADER: &str = "x-poolcast-cache";
/// 请求 ID 响应头
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 构建错误响应
pub fn gateway_error_response(error: GatewayError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let retry_after = error.retry_after_secs;
    let request_id = error.request_id.clone();

    let mut response = (status, Json(GatewayErrorResponse::new(error))).into_response();
    let headers = response.headers_mut();
    if let Some(value) = retry_after.and_then(|s| HeaderValue::from_str(&s.to_string()).ok()) {
        headers.insert(header::RETRY_AFTER, value);
    }
    if let Some(value) = request_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// 调度错误 -> HTTP 响应
pub fn dispatch_error_response(error: &DispatchError, request_id: &str) -> Response {
    let body = error.to_gateway_error(request_id);
    let mut response = gateway_error_response(body);
    // 499 没有对应的错误码，单独设置状态
    if let Ok(status) = StatusCode::from_u16(error.status_code()) {
        *response.status_mut() = status;
    }
    response
}

/// 请求体无效
pub fn invalid_request_response(message: impl Into<String>) -> Response {
    gateway_error_response(GatewayError::new(GatewayErrorCode::InvalidRequest, message))
}

/// 资源不存在
pub fn not_found_response(message: impl Into<String>) -> Response {
    gateway_error_response(GatewayError::new(GatewayErrorCode::NotFound, message))
}

/// 为成功响应附加请求 ID 和缓存状态
pub fn with_dispatch_headers(mut response: Response, dispatched: &DispatchResponse) -> Response {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&dispatched.request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    let cache_state = if dispatched.cache_hit { "hit" } else { "miss" };
    headers.insert(CACHE_CONTROL_HEADER, HeaderValue::from_static(cache_state));
    response
}

/// 构建 SSE 响应
pub fn sse_response(events: Vec<String>) -> Response {
    let body_stream = stream::iter(events.into_iter().map(Ok::<_, std::convert::Infallible>));
    let body = Body::from_stream(body_stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|e| {
            tracing::error!("[SERVER] 构建 SSE 响应失败: {}", e);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap_or_default()
        })
}

/// 单个 SSE data 事件
pub fn sse_data(data: &impl serde::Serialize) -> String {
    let json = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
    format!("data: {json}\n\n")
}

#[cfg(test)]
mod response_tests {
    use super::*;

    #[test]
    fn test_rate_limited_has_retry_after() {
        let err = DispatchError::RateLimited {
            retry_after_secs: 12,
        };
        let response = dispatch_error_response(&err, "req-9");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "12");
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req-9");
    }

    #[test]
    fn test_cancelled_uses_499() {
        let response = dispatch_error_response(&DispatchError::Cancelled, "req-1");
        assert_eq!(response.status().as_u16(), 499);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_sse_data_format() {
        let event = sse_data(&serde_json::json!({"a": 1}));
        assert_eq!(event, "data: {\"a\":1}\n\n");
    }
}
