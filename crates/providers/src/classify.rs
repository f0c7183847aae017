//! 上游错误分类
//!
//! 根据状态码和错误体把上游失败归入 [`UpstreamErrorKind`]。

use crate::upstream::{UpstreamErrorKind, UpstreamFailure};
use poolcast_core::logger::{sanitize_log_message, truncate_for_log};

/// 错误详情写日志的最大长度
const MAX_DETAIL_CHARS: usize = 300;

/// 提取上游错误体中的 `error.status`、`error.message` 和 `details[].reason`
fn error_markers(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    let error = &value["error"];
    let mut markers = vec![
        error["status"].as_str().unwrap_or_default().to_string(),
        error["message"].as_str().unwrap_or_default().to_string(),
    ];
    if let Some(details) = error["details"].as_array() {
        markers.extend(
            details
                .iter()
                .filter_map(|d| d["reason"].as_str())
                .map(ToString::to_string),
        );
    }
    markers.join(" ")
}

/// 对 HTTP 错误响应分类
pub fn classify_status(status: u16, body: &str) -> UpstreamErrorKind {
    let markers = error_markers(body);
    let lower = markers.to_lowercase();

    match status {
        429 if lower.contains("quota") => UpstreamErrorKind::QuotaExhausted,
        429 => UpstreamErrorKind::RateLimited,
        401 | 403 => UpstreamErrorKind::InvalidCredential,
        400 if markers.contains("API_KEY_INVALID") || lower.contains("api key not valid") => {
            UpstreamErrorKind::InvalidCredential
        }
        408 => UpstreamErrorKind::Transient,
        400..=499 => UpstreamErrorKind::BadRequest,
        _ => UpstreamErrorKind::Transient,
    }
}

/// 解析 Retry-After 头（秒数形式）
pub fn parse_retry_after_header(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse::<u64>().ok())
}

/// 解析错误体中的 `RetryInfo.retryDelay`（如 `"30s"`、`"1.5s"`）
pub fn parse_retry_delay(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["details"]
        .as_array()?
        .iter()
        .filter_map(|d| d["retryDelay"].as_str())
        .find_map(|delay| delay.trim().strip_suffix('s')?.parse::<f64>().ok())
        .map(|secs| secs.ceil().max(0.0) as u64)
}

/// 由 HTTP 错误响应构建失败详情
pub fn failure_from_response(
    status: u16,
    retry_after_header: Option<&str>,
    body: &str,
) -> UpstreamFailure {
    let kind = classify_status(status, body);
    let detail = truncate_for_log(&sanitize_log_message(&error_markers(body)), MAX_DETAIL_CHARS);
    let retry_after =
        parse_retry_after_header(retry_after_header).or_else(|| parse_retry_delay(body));
    UpstreamFailure::new(kind, Some(status), detail).with_retry_after(retry_after)
}

/// 由网络层错误构建失败详情
pub fn failure_from_reqwest(error: &reqwest::Error) -> UpstreamFailure {
    let detail = if error.is_timeout() {
        "上游请求超时".to_string()
    } else if error.is_connect() {
        "无法连接上游".to_string()
    } else {
        sanitize_log_message(&error.to_string())
    };
    UpstreamFailure::new(
        UpstreamErrorKind::Transient,
        error.status().map(|s| s.as_u16()),
        detail,
    )
}
