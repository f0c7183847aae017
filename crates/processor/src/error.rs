//! 调度错误

use poolcast_core::errors::{GatewayError, GatewayErrorCode};
use thiserror::Error;

/// 调度错误
///
/// 只携带可以暴露给客户端的信息，不含凭证或上游原始响应。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// 请求无效（模型未知、参数超限、消息为空等）
    #[error("请求无效: {0}")]
    InvalidRequest(String),
    /// 调用方限流
    #[error("请求过于频繁，请 {retry_after_secs} 秒后重试")]
    RateLimited { retry_after_secs: u64 },
    /// 凭证池耗尽
    #[error("没有可用的上游凭证（已尝试 {attempts} 次）")]
    PoolExhausted {
        attempts: u32,
        retry_after_secs: Option<u64>,
    },
    /// 上游认为请求本身有误
    #[error("上游拒绝了该请求")]
    UpstreamRejected { status: Option<u16> },
    /// 超过请求截止时间
    #[error("请求超时")]
    Timeout,
    /// 请求被取消
    #[error("请求已取消")]
    Cancelled,
}

impl DispatchError {
    pub fn code(&self) -> GatewayErrorCode {
        match self {
            DispatchError::InvalidRequest(_) | DispatchError::UpstreamRejected { .. } => {
                GatewayErrorCode::InvalidRequest
            }
            DispatchError::RateLimited { .. } => GatewayErrorCode::RateLimited,
            DispatchError::PoolExhausted { .. } => GatewayErrorCode::NoCredentials,
            DispatchError::Timeout => GatewayErrorCode::UpstreamTimeout,
            DispatchError::Cancelled => GatewayErrorCode::InternalError,
        }
    }

    /// 获取对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            // 客户端已断开，nginx 约定的 499
            DispatchError::Cancelled => 499,
            other => other.code().status_code(),
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            DispatchError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            DispatchError::PoolExhausted {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// 转换为客户端错误
    pub fn to_gateway_error(&self, request_id: &str) -> GatewayError {
        GatewayError::new(self.code(), self.to_string())
            .with_request_id(Some(request_id))
            .with_retry_after(self.retry_after_secs())
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(DispatchError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(
            DispatchError::UpstreamRejected { status: Some(404) }.status_code(),
            400
        );
        assert_eq!(
            DispatchError::RateLimited {
                retry_after_secs: 3
            }
            .status_code(),
            429
        );
        assert_eq!(
            DispatchError::PoolExhausted {
                attempts: 2,
                retry_after_secs: None
            }
            .status_code(),
            503
        );
        assert_eq!(DispatchError::Timeout.status_code(), 504);
    }

    #[test]
    fn test_gateway_error() {
        let err = DispatchError::RateLimited {
            retry_after_secs: 9,
        }
        .to_gateway_error("req-1");
        assert_eq!(err.code, GatewayErrorCode::RateLimited);
        assert_eq!(err.request_id.as_deref(), Some("req-1"));
        assert_eq!(err.retry_after_secs, Some(9));
        assert!(err.retryable);
    }
}
