//! 调度器场景测试
//!
//! 使用按密钥编排结果的模拟上游，覆盖重试、冷却、限流、缓存、超时和取消。

use async_trait::async_trait;
use parking_lot::Mutex;
use poolcast_core::cache::{CacheConfig, ResponseCache};
use poolcast_core::credential::{
    credential_id_for, CooldownConfig, Credential, CredentialPool, CredentialStatus, PoolConfig,
};
use poolcast_core::models::gemini::GenerateContentRequest;
use poolcast_core::models::{
    CacheMode, CallerIdentity, Dialect, Message, NormalizedRequest, Role, SamplingParams,
};
use poolcast_core::rate_limit::{RateLimitRule, RateLimiter};
use poolcast_core::router::{CanonicalModel, ModelResolver, ModelsConfig};
use poolcast_processor::{DispatchConfig, DispatchError, Dispatcher};
use poolcast_providers::{UpstreamClient, UpstreamErrorKind, UpstreamFailure, UpstreamOutcome};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MODEL: &str = "gemini-2.0-flash";

/// 模拟上游：按密钥排队的结果，队列为空时返回成功
#[derive(Default)]
struct MockUpstream {
    scripts: Mutex<HashMap<String, VecDeque<UpstreamOutcome>>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl MockUpstream {
    fn new() -> Self {
        Self::default()
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn script(self, secret: &str, outcomes: Vec<UpstreamOutcome>) -> Self {
        self.scripts
            .lock()
            .entry(secret.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn call(
        &self,
        credential: &Credential,
        model: &CanonicalModel,
        _body: &GenerateContentRequest,
    ) -> UpstreamOutcome {
        let secret = credential.secret.expose().to_string();
        self.calls.lock().push((secret.clone(), model.id.clone()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(&secret)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| UpstreamOutcome::Success(reply(&secret)))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

fn reply(secret: &str) -> Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": format!("answer via {secret}")}]},
            "finishReason": "STOP"
        }]
    })
}

fn failure(kind: UpstreamErrorKind, status: u16) -> UpstreamOutcome {
    UpstreamOutcome::Failure(UpstreamFailure::new(kind, Some(status), "scripted failure"))
}

struct Harness {
    dispatcher: Dispatcher,
    upstream: Arc<MockUpstream>,
    pool: Arc<CredentialPool>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
}

struct Setup {
    secrets: Vec<&'static str>,
    pool: PoolConfig,
    cache: CacheConfig,
    dispatch: DispatchConfig,
    upstream: MockUpstream,
}

impl Setup {
    fn new(secrets: &[&'static str]) -> Self {
        Self {
            secrets: secrets.to_vec(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            dispatch: DispatchConfig::default(),
            upstream: MockUpstream::new(),
        }
    }

    fn build(self) -> Harness {
        let resolver = Arc::new(ModelResolver::from_config(&ModelsConfig::default()));
        let limiter = Arc::new(RateLimiter::new());
        let cache = Arc::new(ResponseCache::new(self.cache));
        let pool = Arc::new(CredentialPool::from_secrets(self.secrets, self.pool));
        let upstream = Arc::new(self.upstream);
        let dispatcher = Dispatcher::new(
            resolver,
            Arc::clone(&limiter),
            Arc::clone(&cache),
            Arc::clone(&pool),
            Arc::clone(&upstream) as Arc<dyn UpstreamClient>,
            self.dispatch,
        );
        Harness {
            dispatcher,
            upstream,
            pool,
            cache,
            limiter,
        }
    }
}

fn request(model: &str, text: &str) -> NormalizedRequest {
    NormalizedRequest::new(
        model,
        vec![Message::text(Role::User, text)],
        CallerIdentity::ip("10.0.0.7"),
        Dialect::OpenAI,
    )
}

fn credential(pool: &CredentialPool, secret: &str) -> Credential {
    pool.get(&credential_id_for(secret)).unwrap()
}

#[tokio::test]
async fn test_two_credentials_caller_limit_five_per_minute() {
    let mut setup = Setup::new(&["key-alpha", "key-beta"]);
    setup.dispatch.caller_rate_limit = Some(RateLimitRule::per_minute(5));
    let h = setup.build();

    for i in 0..5 {
        let response = h
            .dispatcher
            .handle(request(MODEL, &format!("question {i}")))
            .await
            .unwrap();
        assert!(!response.cache_hit);
        assert_eq!(response.attempts, 1);
    }

    let denied = h
        .dispatcher
        .handle(request(MODEL, "question 5"))
        .await
        .unwrap_err();
    assert_eq!(denied.status_code(), 429);
    match denied {
        DispatchError::RateLimited { retry_after_secs } => assert!(retry_after_secs > 0),
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(h.upstream.call_count(), 5);
    let a = credential(&h.pool, "key-alpha").stats.usage_count;
    let b = credential(&h.pool, "key-beta").stats.usage_count;
    assert_eq!(a + b, 5);
    assert!(a.abs_diff(b) <= 1, "usage should be balanced: {a} vs {b}");
}

#[tokio::test]
async fn test_quota_failure_cools_credential_and_retries_next() {
    let mut setup = Setup::new(&["key-alpha", "key-beta"]);
    setup.upstream = MockUpstream::new().script(
        "key-alpha",
        vec![failure(UpstreamErrorKind::QuotaExhausted, 429)],
    );
    let h = setup.build();

    let before = chrono::Utc::now();
    let response = h.dispatcher.handle(request(MODEL, "hello")).await.unwrap();
    assert_eq!(response.attempts, 2);
    assert_eq!(
        response.payload["candidates"][0]["content"]["parts"][0]["text"],
        "answer via key-beta"
    );

    let alpha = credential(&h.pool, "key-alpha");
    let until = alpha.cooldown_until().expect("alpha should be cooling");
    let cooldown = (until - before).num_milliseconds();
    assert!((29_000..=31_000).contains(&cooldown), "cooldown was {cooldown}ms");
    assert_eq!(alpha.stats.failure_count, 1);
    assert_eq!(alpha.stats.usage_count, 0);

    let beta = credential(&h.pool, "key-beta");
    assert_eq!(beta.stats.usage_count, 1);
    assert_eq!(beta.status, CredentialStatus::Active);
}

#[tokio::test]
async fn test_upstream_retry_after_extends_cooldown() {
    let mut setup = Setup::new(&["key-alpha"]);
    setup.upstream = MockUpstream::new().script(
        "key-alpha",
        vec![UpstreamOutcome::Failure(
            UpstreamFailure::new(UpstreamErrorKind::RateLimited, Some(429), "slow down")
                .with_retry_after(Some(120)),
        )],
    );
    let h = setup.build();

    let before = chrono::Utc::now();
    let err = h.dispatcher.handle(request(MODEL, "hello")).await.unwrap_err();

    let until = credential(&h.pool, "key-alpha").cooldown_until().unwrap();
    let cooldown = (until - before).num_milliseconds();
    assert!((119_000..=121_000).contains(&cooldown), "cooldown was {cooldown}ms");
    match err {
        DispatchError::PoolExhausted {
            attempts: 1,
            retry_after_secs: Some(hint),
        } => assert!((118..=120).contains(&hint), "hint was {hint}s"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_repeated_quota_failure_doubles_cooldown() {
    let mut setup = Setup::new(&["key-alpha", "key-beta"]);
    setup.pool.cooldown = CooldownConfig {
        base_cooldown_secs: 1,
        ..CooldownConfig::default()
    };
    setup.upstream = MockUpstream::new().script(
        "key-alpha",
        vec![
            failure(UpstreamErrorKind::QuotaExhausted, 429),
            failure(UpstreamErrorKind::QuotaExhausted, 429),
        ],
    );
    let h = setup.build();

    let start = chrono::Utc::now();
    h.dispatcher.handle(request(MODEL, "first")).await.unwrap();
    let first = credential(&h.pool, "key-alpha").cooldown_until().unwrap();
    let first_ms = (first - start).num_milliseconds();
    assert!((900..=1_500).contains(&first_ms), "first cooldown {first_ms}ms");

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    // alpha 冷却结束且从未成功过，会被优先选中并再次失败
    let second_start = chrono::Utc::now();
    let response = h.dispatcher.handle(request(MODEL, "second")).await.unwrap();
    assert_eq!(response.attempts, 2);

    let alpha = credential(&h.pool, "key-alpha");
    assert_eq!(alpha.stats.failure_count, 2);
    let second_ms = (alpha.cooldown_until().unwrap() - second_start).num_milliseconds();
    assert!((1_900..=2_500).contains(&second_ms), "second cooldown {second_ms}ms");
    assert_eq!(credential(&h.pool, "key-beta").stats.usage_count, 2);
}

#[tokio::test]
async fn test_retry_exhaustion_is_bounded() {
    let secrets = ["k1", "k2", "k3", "k4", "k5"];
    let mut setup = Setup::new(&secrets);
    setup.dispatch.max_attempts = 3;
    let mut upstream = MockUpstream::new();
    for secret in secrets {
        upstream = upstream.script(secret, vec![failure(UpstreamErrorKind::Transient, 503)]);
    }
    setup.upstream = upstream;
    let h = setup.build();

    let err = h.dispatcher.handle(request(MODEL, "hi")).await.unwrap_err();
    assert_eq!(
        err,
        DispatchError::PoolExhausted {
            attempts: 3,
            retry_after_secs: None
        }
    );
    assert_eq!(err.status_code(), 503);
    assert_eq!(h.upstream.call_count(), 3);

    // 每个凭证在同一请求内最多尝试一次
    let mut called: Vec<String> = h.upstream.calls().into_iter().map(|(s, _)| s).collect();
    called.sort();
    called.dedup();
    assert_eq!(called.len(), 3);
}

#[tokio::test]
async fn test_attempts_capped_by_pool_size() {
    let mut setup = Setup::new(&["only"]);
    setup.dispatch.max_attempts = 5;
    setup.pool.cooldown.transient_failure_threshold = 1;
    setup.upstream =
        MockUpstream::new().script("only", vec![failure(UpstreamErrorKind::Transient, 500)]);
    let h = setup.build();

    let err = h.dispatcher.handle(request(MODEL, "hi")).await.unwrap_err();
    match err {
        DispatchError::PoolExhausted {
            attempts,
            retry_after_secs,
        } => {
            assert_eq!(attempts, 1);
            let hint = retry_after_secs.expect("cooling credential gives a hint");
            assert!((1..=30).contains(&hint));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.upstream.call_count(), 1);
}

#[tokio::test]
async fn test_invalid_credential_is_disabled() {
    let mut setup = Setup::new(&["revoked", "good"]);
    setup.upstream = MockUpstream::new().script(
        "revoked",
        vec![failure(UpstreamErrorKind::InvalidCredential, 403)],
    );
    let h = setup.build();

    h.dispatcher.handle(request(MODEL, "one")).await.unwrap();
    assert!(matches!(
        credential(&h.pool, "revoked").status,
        CredentialStatus::Disabled { .. }
    ));

    h.dispatcher.handle(request(MODEL, "two")).await.unwrap();
    let revoked_calls = h
        .upstream
        .calls()
        .iter()
        .filter(|(secret, _)| secret == "revoked")
        .count();
    assert_eq!(revoked_calls, 1);
}

#[tokio::test]
async fn test_bad_request_is_not_retried_or_penalized() {
    let mut setup = Setup::new(&["key-alpha", "key-beta"]);
    let rejected = UpstreamOutcome::Failure(UpstreamFailure::new(
        UpstreamErrorKind::BadRequest,
        Some(400),
        "Invalid JSON payload",
    ));
    setup.upstream = MockUpstream::new().script("key-alpha", vec![rejected]);
    let h = setup.build();

    let err = h.dispatcher.handle(request(MODEL, "bad")).await.unwrap_err();
    assert_eq!(err, DispatchError::UpstreamRejected { status: Some(400) });
    assert_eq!(err.status_code(), 400);
    assert_eq!(h.upstream.call_count(), 1);

    let alpha = credential(&h.pool, "key-alpha");
    assert_eq!(alpha.stats.failure_count, 0);
    assert_eq!(alpha.status, CredentialStatus::Active);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_cache_hit_consumes_no_budget() {
    let mut setup = Setup::new(&["key-alpha"]);
    setup.dispatch.caller_rate_limit = Some(RateLimitRule::per_minute(1));
    let h = setup.build();

    let first = h.dispatcher.handle(request(MODEL, "same")).await.unwrap();
    assert!(!first.cache_hit);
    assert!(first.fingerprint.is_some());

    let second = h.dispatcher.handle(request(MODEL, "same")).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.attempts, 0);
    assert_eq!(second.payload, first.payload);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(h.upstream.call_count(), 1);
    assert_eq!(credential(&h.pool, "key-alpha").stats.usage_count, 1);

    // 调用方额度只被第一次请求消耗
    let err = h
        .dispatcher
        .handle(request(MODEL, "different"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::RateLimited { .. }));
}

#[tokio::test]
async fn test_alias_and_prefixed_canonical_share_cache_entry() {
    let h = Setup::new(&["key-alpha"]).build();

    let via_alias = h
        .dispatcher
        .handle(request("gemini-flash", "what is rust"))
        .await
        .unwrap();
    assert_eq!(via_alias.model, "gemini-2.5-flash");

    let via_canonical = h
        .dispatcher
        .handle(request("models/gemini-2.5-flash", "what is rust"))
        .await
        .unwrap();
    assert!(via_canonical.cache_hit);
    assert_eq!(via_alias.fingerprint, via_canonical.fingerprint);
    assert_eq!(
        h.upstream.calls(),
        vec![("key-alpha".to_string(), "gemini-2.5-flash".to_string())]
    );
}

#[tokio::test]
async fn test_sampling_difference_misses_cache() {
    let h = Setup::new(&["key-alpha"]).build();

    h.dispatcher.handle(request(MODEL, "poem")).await.unwrap();
    let warmer = request(MODEL, "poem").with_sampling(SamplingParams {
        temperature: Some(0.9),
        ..SamplingParams::default()
    });
    let response = h.dispatcher.handle(warmer).await.unwrap();
    assert!(!response.cache_hit);
    assert_eq!(h.upstream.call_count(), 2);
    assert_eq!(h.cache.len(), 2);
}

#[tokio::test]
async fn test_bypass_skips_cache() {
    let h = Setup::new(&["key-alpha"]).build();

    for _ in 0..2 {
        let response = h
            .dispatcher
            .handle(request(MODEL, "fresh").with_cache_mode(CacheMode::Bypass))
            .await
            .unwrap();
        assert!(!response.cache_hit);
        assert!(response.fingerprint.is_none());
    }
    assert_eq!(h.upstream.call_count(), 2);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_streaming_requests_are_not_cached() {
    let h = Setup::new(&["key-alpha"]).build();

    for _ in 0..2 {
        let response = h
            .dispatcher
            .handle(request(MODEL, "stream me").with_stream(true))
            .await
            .unwrap();
        assert!(!response.cache_hit);
    }
    assert_eq!(h.upstream.call_count(), 2);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_invalid_requests_consume_nothing() {
    let mut setup = Setup::new(&["key-alpha"]);
    setup.dispatch.caller_rate_limit = Some(RateLimitRule::per_minute(5));
    let h = setup.build();

    let unknown = h
        .dispatcher
        .handle(request("gpt-4o", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(unknown, DispatchError::InvalidRequest(_)));
    assert_eq!(unknown.status_code(), 400);

    let too_long = request(MODEL, "hi").with_sampling(SamplingParams {
        max_output_tokens: Some(100_000),
        ..SamplingParams::default()
    });
    let err = h.dispatcher.handle(too_long).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidRequest(_)));

    let empty = NormalizedRequest::new(
        MODEL,
        Vec::new(),
        CallerIdentity::ip("10.0.0.7"),
        Dialect::Native,
    );
    let err = h.dispatcher.handle(empty).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidRequest(_)));

    assert_eq!(h.upstream.call_count(), 0);
    assert!(h.limiter.is_empty());
    assert_eq!(credential(&h.pool, "key-alpha").stats.usage_count, 0);
}

#[tokio::test]
async fn test_credential_scope_denial_does_not_penalize() {
    let mut setup = Setup::new(&["key-alpha", "key-beta"]);
    setup.dispatch.credential_rate_limit = Some(RateLimitRule::per_minute(1));
    let h = setup.build();

    h.dispatcher.handle(request(MODEL, "one")).await.unwrap();
    h.dispatcher.handle(request(MODEL, "two")).await.unwrap();

    let err = h
        .dispatcher
        .handle(request(MODEL, "three"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DispatchError::PoolExhausted {
            attempts: 2,
            retry_after_secs: None
        }
    );
    assert_eq!(h.upstream.call_count(), 2);
    for secret in ["key-alpha", "key-beta"] {
        let c = credential(&h.pool, secret);
        assert_eq!(c.stats.failure_count, 0);
        assert_eq!(c.status, CredentialStatus::Active);
    }
}

#[tokio::test]
async fn test_empty_pool_is_exhausted() {
    let h = Setup::new(&[]).build();
    let err = h.dispatcher.handle(request(MODEL, "hi")).await.unwrap_err();
    assert_eq!(
        err,
        DispatchError::PoolExhausted {
            attempts: 0,
            retry_after_secs: None
        }
    );
}

#[tokio::test]
async fn test_deadline_drops_call_without_side_effects() {
    let mut setup = Setup::new(&["slow"]);
    setup.dispatch.request_timeout = Duration::from_millis(100);
    setup.upstream = MockUpstream::new().with_delay(Duration::from_secs(2));
    let h = setup.build();

    let err = h.dispatcher.handle(request(MODEL, "hi")).await.unwrap_err();
    assert_eq!(err, DispatchError::Timeout);
    assert_eq!(err.status_code(), 504);

    let slow = credential(&h.pool, "slow");
    assert_eq!(slow.stats.failure_count, 0);
    assert_eq!(slow.stats.usage_count, 0);
    assert_eq!(slow.in_flight(), 0);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_cancellation_drops_call_without_side_effects() {
    let mut setup = Setup::new(&["slow"]);
    setup.upstream = MockUpstream::new().with_delay(Duration::from_secs(2));
    let h = setup.build();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = h
        .dispatcher
        .handle_with_cancel(request(MODEL, "hi"), cancel)
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::Cancelled);
    assert_eq!(h.upstream.call_count(), 1);

    let slow = credential(&h.pool, "slow");
    assert_eq!(slow.stats.failure_count, 0);
    assert_eq!(slow.in_flight(), 0);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_in_flight_budget_spreads_concurrent_requests() {
    let mut setup = Setup::new(&["key-alpha", "key-beta"]);
    setup.pool.max_in_flight = Some(1);
    setup.upstream = MockUpstream::new().with_delay(Duration::from_millis(200));
    let h = Arc::new(setup.build());

    let mut tasks = Vec::new();
    for i in 0..2 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            h.dispatcher.handle(request(MODEL, &format!("parallel {i}"))).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut used: Vec<String> = h.upstream.calls().into_iter().map(|(s, _)| s).collect();
    used.sort();
    assert_eq!(used, vec!["key-alpha".to_string(), "key-beta".to_string()]);
}
