//! 网关统一错误模型
//!
//! 客户端只能看到错误类别、文案和请求 ID，不会看到凭证或上游原始响应。

use serde::{Deserialize, Serialize};

/// 网关错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    InvalidRequest,
    AuthenticationFailed,
    Forbidden,
    NotFound,
    RateLimited,
    NoCredentials,
    UpstreamTimeout,
    UpstreamError,
    InternalError,
}

impl GatewayErrorCode {
    /// 对应的 HTTP 状态码
    pub fn status_code(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::AuthenticationFailed => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::NoCredentials => 503,
            Self::UpstreamTimeout => 504,
            Self::UpstreamError => 502,
            Self::InternalError => 500,
        }
    }

    /// 默认错误文案
    pub fn default_message(self) -> &'static str {
        match self {
            Self::InvalidRequest => "请求参数无效",
            Self::AuthenticationFailed => "认证失败",
            Self::Forbidden => "无权访问",
            Self::NotFound => "资源不存在",
            Self::RateLimited => "请求过于频繁，请稍后重试",
            Self::NoCredentials => "当前没有可用凭证",
            Self::UpstreamTimeout => "上游请求超时",
            Self::UpstreamError => "上游服务返回错误",
            Self::InternalError => "服务内部错误",
        }
    }

    /// 是否可重试
    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::NoCredentials | Self::UpstreamTimeout | Self::UpstreamError
        )
    }
}

/// 网关错误详情
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayError {
    pub code: GatewayErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// 建议重试等待秒数（同时写入 Retry-After 头）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl GatewayError {
    /// 创建错误详情
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let final_message = if message.trim().is_empty() {
            code.default_message().to_string()
        } else {
            message
        };

        Self {
            code,
            message: final_message,
            retryable: code.retryable(),
            request_id: None,
            retry_after_secs: None,
        }
    }

    /// 设置请求 ID
    pub fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        self.request_id = request_id.map(ToString::to_string);
        self
    }

    /// 设置重试等待秒数
    pub fn with_retry_after(mut self, retry_after_secs: Option<u64>) -> Self {
        self.retry_after_secs = retry_after_secs;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }
}

/// 网关错误响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayErrorResponse {
    pub error: GatewayError,
}

impl GatewayErrorResponse {
    /// 创建响应
    pub fn new(error: GatewayError) -> Self {
        Self { error }
    }
}
