//! 请求上下文
//!
//! 记录单个请求在调度状态机中的进展，仅在本次请求内使用。

use poolcast_core::models::NormalizedRequest;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;

/// 调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Received,
    Resolved,
    CacheChecked,
    Admitted,
    Dispatching,
    Succeeded,
    Failed,
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DispatchState::Received => "received",
            DispatchState::Resolved => "resolved",
            DispatchState::CacheChecked => "cache_checked",
            DispatchState::Admitted => "admitted",
            DispatchState::Dispatching => "dispatching",
            DispatchState::Succeeded => "succeeded",
            DispatchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 请求上下文
#[derive(Debug)]
pub struct RequestContext {
    /// 请求 ID
    pub request_id: String,
    /// 客户端请求的模型名
    pub original_model: String,
    /// 解析后的规范模型
    pub resolved_model: Option<String>,
    /// 当前状态
    pub state: DispatchState,
    /// 已尝试的凭证 ID
    pub tried: HashSet<String>,
    /// 已尝试次数
    pub attempts: u32,
    /// 是否命中缓存
    pub cache_hit: bool,
    start_time: Instant,
}

impl RequestContext {
    pub fn new(request: &NormalizedRequest) -> Self {
        Self::with_request_id(uuid::Uuid::new_v4().simple().to_string(), request)
    }

    pub fn with_request_id(request_id: impl Into<String>, request: &NormalizedRequest) -> Self {
        Self {
            request_id: request_id.into(),
            original_model: request.model.clone(),
            resolved_model: None,
            state: DispatchState::Received,
            tried: HashSet::new(),
            attempts: 0,
            cache_hit: false,
            start_time: Instant::now(),
        }
    }

    pub fn set_resolved_model(&mut self, model: impl Into<String>) {
        self.resolved_model = Some(model.into());
    }

    /// 状态迁移
    pub fn transition(&mut self, next: DispatchState) {
        tracing::trace!(
            "[DISPATCH] request_id={} {} -> {}",
            self.request_id,
            self.state,
            next
        );
        self.state = next;
    }

    /// 记录一次凭证尝试
    pub fn record_attempt(&mut self, credential_id: &str) {
        self.attempts += 1;
        self.tried.insert(credential_id.to_string());
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod context_tests {
    use super::*;
    use poolcast_core::models::{CallerIdentity, Dialect, Message, Role};

    #[test]
    fn test_context_tracks_attempts() {
        let request = NormalizedRequest::new(
            "flash",
            vec![Message::text(Role::User, "hi")],
            CallerIdentity::ip("1"),
            Dialect::OpenAI,
        );
        let mut ctx = RequestContext::new(&request);
        assert_eq!(ctx.request_id.len(), 32);
        assert_eq!(ctx.state, DispatchState::Received);

        ctx.record_attempt("key-a");
        ctx.record_attempt("key-b");
        ctx.transition(DispatchState::Dispatching);
        assert_eq!(ctx.attempts, 2);
        assert!(ctx.tried.contains("key-a"));
        assert_eq!(ctx.state, DispatchState::Dispatching);
    }
}
