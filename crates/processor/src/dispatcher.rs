//! 请求调度器
//!
//! 按固定顺序编排一次请求：
//! 模型解析 -> 缓存查询 -> 调用方限流 -> 凭证重试循环 -> 上游调用 -> 结果上报 -> 写入缓存。
//!
//! 凭证池、限流器和缓存都是同步组件，临界区不跨越 `.await`；
//! 唯一的挂起点是上游调用。

use crate::context::{DispatchState, RequestContext};
use crate::error::DispatchError;
use chrono::Utc;
use poolcast_core::cache::{Fingerprint, ResponseCache};
use poolcast_core::config::Config;
use poolcast_core::credential::CredentialPool;
use poolcast_core::logger::{sanitize_log_message, truncate_for_log};
use poolcast_core::models::NormalizedRequest;
use poolcast_core::rate_limit::{Admission, RateLimitRule, RateLimiter};
use poolcast_core::router::ModelResolver;
use poolcast_providers::converter::build_generate_content_request;
use poolcast_providers::{UpstreamClient, UpstreamOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 调度配置
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// 单个请求最多尝试的凭证数（实际还受凭证池大小限制）
    pub max_attempts: usize,
    /// 整个请求的截止时间
    pub request_timeout: Duration,
    /// 调用方限流规则
    pub caller_rate_limit: Option<RateLimitRule>,
    /// 单凭证限流规则
    pub credential_rate_limit: Option<RateLimitRule>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(300),
            caller_rate_limit: None,
            credential_rate_limit: None,
        }
    }
}

impl DispatchConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry.max_attempts,
            request_timeout: Duration::from_secs(config.retry.request_timeout_secs),
            caller_rate_limit: config.rate_limit.caller,
            credential_rate_limit: config.rate_limit.credential,
        }
    }
}

/// 调度成功的响应
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub request_id: String,
    /// 规范模型 ID
    pub model: String,
    /// 上游原始响应（缓存命中时与缓存条目共享）
    pub payload: Arc<Value>,
    pub cache_hit: bool,
    /// 实际尝试的凭证数
    pub attempts: u32,
    /// 请求参与缓存时的指纹
    pub fingerprint: Option<Fingerprint>,
}

/// 请求调度器
pub struct Dispatcher {
    resolver: Arc<ModelResolver>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    pool: Arc<CredentialPool>,
    upstream: Arc<dyn UpstreamClient>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        resolver: Arc<ModelResolver>,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
        pool: Arc<CredentialPool>,
        upstream: Arc<dyn UpstreamClient>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            resolver,
            limiter,
            cache,
            pool,
            upstream,
            config,
        }
    }

    pub fn resolver(&self) -> &Arc<ModelResolver> {
        &self.resolver
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// 处理请求（不可取消）
    pub async fn handle(
        &self,
        request: NormalizedRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        let mut ctx = RequestContext::new(&request);
        self.dispatch(&mut ctx, request, CancellationToken::new()).await
    }

    /// 处理请求，`cancel` 触发时放弃上游调用
    pub async fn handle_with_cancel(
        &self,
        request: NormalizedRequest,
        cancel: CancellationToken,
    ) -> Result<DispatchResponse, DispatchError> {
        let mut ctx = RequestContext::new(&request);
        self.dispatch(&mut ctx, request, cancel).await
    }

    /// 使用调用方提供的上下文处理请求
    ///
    /// 截止时间或取消先到时，进行中的上游调用被丢弃：不写缓存，也不对凭证上报任何结果。
    pub async fn dispatch(
        &self,
        ctx: &mut RequestContext,
        request: NormalizedRequest,
        cancel: CancellationToken,
    ) -> Result<DispatchResponse, DispatchError> {
        tracing::info!(
            "[DISPATCH] 收到请求: request_id={}, model={}, dialect={}, stream={}, caller={}",
            ctx.request_id,
            request.model,
            request.dialect,
            request.stream,
            request.caller.scope_id()
        );

        let deadline = self.config.request_timeout;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            outcome = tokio::time::timeout(deadline, self.run(ctx, &request)) => {
                outcome.unwrap_or(Err(DispatchError::Timeout))
            }
        };

        match &result {
            Ok(response) => {
                tracing::info!(
                    "[DISPATCH] 请求完成: request_id={}, model={}, cache_hit={}, attempts={}, elapsed={}ms",
                    ctx.request_id,
                    response.model,
                    response.cache_hit,
                    response.attempts,
                    ctx.elapsed_ms()
                );
            }
            Err(err) => {
                ctx.transition(DispatchState::Failed);
                tracing::warn!(
                    "[DISPATCH] 请求失败: request_id={}, error={}, attempts={}, elapsed={}ms",
                    ctx.request_id,
                    err,
                    ctx.attempts,
                    ctx.elapsed_ms()
                );
            }
        }

        result
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        request: &NormalizedRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        if request.messages.is_empty() {
            return Err(DispatchError::InvalidRequest("消息列表不能为空".to_string()));
        }

        let model = self
            .resolver
            .resolve(&request.model)
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;
        if let Some(requested) = request.sampling.max_output_tokens {
            if requested > model.max_output_tokens {
                return Err(DispatchError::InvalidRequest(format!(
                    "max_output_tokens {} 超过模型 {} 的上限 {}",
                    requested, model.id, model.max_output_tokens
                )));
            }
        }
        ctx.set_resolved_model(&model.id);
        ctx.transition(DispatchState::Resolved);

        // 缓存命中不消耗任何限流额度
        let cache_key = if self.cache.is_cacheable(request) {
            let scope = self.cache.scope_for(&request.caller);
            let fingerprint = Fingerprint::compute(&scope, &model.id, request);
            if let Some(entry) = self.cache.lookup(&fingerprint) {
                tracing::debug!(
                    "[CACHE] 命中: request_id={}, fingerprint={}, hits={}",
                    ctx.request_id,
                    fingerprint.short(),
                    entry.hits
                );
                ctx.cache_hit = true;
                ctx.transition(DispatchState::CacheChecked);
                ctx.transition(DispatchState::Succeeded);
                return Ok(DispatchResponse {
                    request_id: ctx.request_id.clone(),
                    model: model.id,
                    payload: entry.payload,
                    cache_hit: true,
                    attempts: 0,
                    fingerprint: Some(fingerprint),
                });
            }
            Some((scope, fingerprint))
        } else {
            None
        };
        ctx.transition(DispatchState::CacheChecked);

        if let Some(rule) = self.config.caller_rate_limit {
            let scope = request.caller.scope_id();
            if let Admission::Denied { retry_after_secs } = self.limiter.admit(&scope, rule) {
                tracing::warn!(
                    "[RATE_LIMIT] 调用方被限流: request_id={}, scope={}, retry_after={}s",
                    ctx.request_id,
                    scope,
                    retry_after_secs
                );
                return Err(DispatchError::RateLimited { retry_after_secs });
            }
        }
        ctx.transition(DispatchState::Admitted);

        let body = build_generate_content_request(request);
        let max_attempts = self.config.max_attempts.min(self.pool.len());
        ctx.transition(DispatchState::Dispatching);

        while (ctx.attempts as usize) < max_attempts {
            let lease = match self.pool.acquire(&ctx.tried) {
                Ok(lease) => lease,
                Err(e) => {
                    tracing::debug!("[POOL] 无法获取凭证: request_id={}, {}", ctx.request_id, e);
                    break;
                }
            };
            ctx.record_attempt(&lease.id);

            if let Some(rule) = self.config.credential_rate_limit {
                let scope = RateLimiter::credential_scope(&lease.id);
                if let Admission::Denied { retry_after_secs } = self.limiter.admit(&scope, rule) {
                    tracing::debug!(
                        "[RATE_LIMIT] 凭证额度已满，换下一个: request_id={}, credential={}, retry_after={}s",
                        ctx.request_id,
                        lease.id,
                        retry_after_secs
                    );
                    continue;
                }
            }

            tracing::debug!(
                "[UPSTREAM] 调用 {}: request_id={}, credential={}, model={}, attempt={}/{}",
                self.upstream.name(),
                ctx.request_id,
                lease.id,
                model.id,
                ctx.attempts,
                max_attempts
            );

            match self.upstream.call(lease.credential(), &model, &body).await {
                UpstreamOutcome::Success(payload) => {
                    self.pool.report_success(&lease.id);
                    let payload = Arc::new(payload);
                    let fingerprint = cache_key.map(|(scope, fingerprint)| {
                        self.cache.store(
                            fingerprint.clone(),
                            &scope,
                            &model.id,
                            Arc::clone(&payload),
                            None,
                        );
                        fingerprint
                    });
                    ctx.transition(DispatchState::Succeeded);
                    return Ok(DispatchResponse {
                        request_id: ctx.request_id.clone(),
                        model: model.id,
                        payload,
                        cache_hit: false,
                        attempts: ctx.attempts,
                        fingerprint,
                    });
                }
                UpstreamOutcome::Failure(failure) => {
                    let detail = truncate_for_log(&sanitize_log_message(&failure.detail), 200);
                    let Some(kind) = failure.kind.failure_kind() else {
                        tracing::warn!(
                            "[UPSTREAM] 上游拒绝请求: request_id={}, status={:?}, detail={}",
                            ctx.request_id,
                            failure.status,
                            detail
                        );
                        return Err(DispatchError::UpstreamRejected {
                            status: failure.status,
                        });
                    };
                    let status = self
                        .pool
                        .report_failure(&lease.id, kind, failure.retry_after_secs);
                    tracing::warn!(
                        "[RETRY] request_id={} attempt={}/{} credential={} kind={} status={:?} -> {}: {}",
                        ctx.request_id,
                        ctx.attempts,
                        max_attempts,
                        lease.id,
                        failure.kind,
                        failure.status,
                        status.as_ref().map_or("unknown", |s| s.label()),
                        detail
                    );
                }
            }
        }

        let retry_after_secs = self
            .pool
            .earliest_recovery()
            .map(|until| (until - Utc::now()).num_seconds().max(1) as u64);
        Err(DispatchError::PoolExhausted {
            attempts: ctx.attempts,
            retry_after_secs,
        })
    }
}
