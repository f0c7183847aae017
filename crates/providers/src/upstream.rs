//! 上游调用接口
//!
//! 调度器只通过 [`UpstreamClient`] 与上游交互，测试中可替换为脚本化实现。

use async_trait::async_trait;
use poolcast_core::credential::{Credential, FailureKind};
use poolcast_core::models::gemini::GenerateContentRequest;
use poolcast_core::router::CanonicalModel;
use serde::Serialize;

/// 上游错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// 配额耗尽
    QuotaExhausted,
    /// 限流
    RateLimited,
    /// 超时、5xx、网络错误
    Transient,
    /// 密钥无效
    InvalidCredential,
    /// 请求本身有问题（换凭证也不会成功）
    BadRequest,
}

impl UpstreamErrorKind {
    /// 对应的凭证失败类型（请求错误不计入凭证）
    pub fn failure_kind(self) -> Option<FailureKind> {
        match self {
            UpstreamErrorKind::QuotaExhausted => Some(FailureKind::QuotaExhausted),
            UpstreamErrorKind::RateLimited => Some(FailureKind::RateLimited),
            UpstreamErrorKind::Transient => Some(FailureKind::Transient),
            UpstreamErrorKind::InvalidCredential => Some(FailureKind::InvalidCredential),
            UpstreamErrorKind::BadRequest => None,
        }
    }
}

impl std::fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamErrorKind::QuotaExhausted => write!(f, "quota_exhausted"),
            UpstreamErrorKind::RateLimited => write!(f, "rate_limited"),
            UpstreamErrorKind::Transient => write!(f, "transient"),
            UpstreamErrorKind::InvalidCredential => write!(f, "invalid_credential"),
            UpstreamErrorKind::BadRequest => write!(f, "bad_request"),
        }
    }
}

/// 上游失败详情
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamFailure {
    pub kind: UpstreamErrorKind,
    /// HTTP 状态码（网络错误时为 None）
    pub status: Option<u16>,
    /// 已脱敏的错误详情，仅用于日志
    pub detail: String,
    /// 上游建议的重试等待秒数
    pub retry_after_secs: Option<u64>,
}

impl UpstreamFailure {
    pub fn new(kind: UpstreamErrorKind, status: Option<u16>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            detail: detail.into(),
            retry_after_secs: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after_secs: Option<u64>) -> Self {
        self.retry_after_secs = retry_after_secs;
        self
    }
}

/// 上游调用结果
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamOutcome {
    /// 成功，携带上游原始响应
    Success(serde_json::Value),
    /// 失败
    Failure(UpstreamFailure),
}

/// 上游客户端
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// 使用指定凭证调用一次上游
    async fn call(
        &self,
        credential: &Credential,
        model: &CanonicalModel,
        body: &GenerateContentRequest,
    ) -> UpstreamOutcome;

    /// 上游名称（日志使用）
    fn name(&self) -> &'static str;
}
