//! 日志配置与脱敏

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 默认日志级别（RUST_LOG 优先）
    pub level: String,
    /// 输出 JSON 格式
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// 初始化全局 tracing subscriber
///
/// 重复初始化（例如测试中）会被忽略。
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("[BOOTSTRAP] tracing 已初始化，跳过");
    }
}

static SANITIZE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Bearer\s+[A-Za-z0-9._-]+", "Bearer ***"),
        (r"([?&]key=)[A-Za-z0-9._-]+", "${1}***"),
        (
            r#"(?i)x-goog-api-key["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "x-goog-api-key: ***",
        ),
        (
            r#"api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "api_key: ***",
        ),
        (r"AIza[0-9A-Za-z_-]{20,}", "AIza***"),
        (
            r#"[Aa]uthorization["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "authorization: ***",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// 日志脱敏：隐藏 Bearer token、`key=` 查询参数和 API Key
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (re, replacement) in SANITIZE_PATTERNS.iter() {
        sanitized = re.replace_all(&sanitized, *replacement).into_owned();
    }
    sanitized
}

/// 截断长文本（上游错误详情写日志前使用）
pub fn truncate_for_log(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let truncated: String = message.chars().take(max_chars).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod logger_tests {
    use super::*;

    #[test]
    fn test_sanitize_bearer_token() {
        let output = sanitize_log_message("Authorization: Bearer abcDEF123._-XYZ");
        assert!(!output.contains("abcDEF123"));
        assert!(output.contains("***"));
    }

    #[test]
    fn test_sanitize_query_key() {
        let output =
            sanitize_log_message("POST /v1beta/models/m:generateContent?key=secretvalue&alt=sse");
        assert!(!output.contains("secretvalue"));
        assert!(output.contains("?key=***"));
        assert!(output.contains("&alt=sse"));
    }

    #[test]
    fn test_sanitize_google_key() {
        let output = sanitize_log_message("API key not valid: AIzaSyD-abcdefghijklmnopqrstu");
        assert!(!output.contains("abcdefghijklmnop"));

        let output = sanitize_log_message(r#"x-goog-api-key: "zzz-123""#);
        assert!(!output.contains("zzz-123"));
    }

    #[test]
    fn test_plain_text_unchanged() {
        let input = "这是一段普通日志，不包含任何敏感字段。";
        assert_eq!(sanitize_log_message(input), input);
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("abc", 5), "abc");
        assert_eq!(truncate_for_log("abcdef", 3), "abc…");
    }
}
