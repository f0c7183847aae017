//! 应用启动引导模块
//!
//! 加载配置和凭证，构造凭证池、限流器、缓存、模型解析器和上游客户端，
//! 然后把它们注入 `Dispatcher`。这里不使用任何全局单例。

use poolcast_core::cache::ResponseCache;
use poolcast_core::config::{resolve_config_path, Config, ConfigError};
use poolcast_core::credential::CredentialPool;
use poolcast_core::rate_limit::RateLimiter;
use poolcast_core::router::ModelResolver;
use poolcast_processor::{DispatchConfig, Dispatcher};
use poolcast_providers::{GeminiProvider, ProviderError, UpstreamClient};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// 启动错误
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("上游客户端初始化失败: {0}")]
    Provider(#[from] ProviderError),
}

/// 装配完成的组件
pub struct AppComponents {
    pub config: Config,
    pub dispatcher: Arc<Dispatcher>,
    pub pool: Arc<CredentialPool>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
}

/// 加载并校验配置
pub fn load_config(cli_path: Option<PathBuf>) -> Result<Config, BootstrapError> {
    let path = resolve_config_path(cli_path);
    let config = Config::load(&path)?;
    Ok(config)
}

/// 加载凭证并构造凭证池
///
/// 凭证来源为空时仍然返回空池，所有请求会得到 NO_CREDENTIALS。
pub fn load_credentials(config: &Config) -> Result<CredentialPool, BootstrapError> {
    let secrets = config.credentials.load_secrets()?;
    let pool = CredentialPool::from_secrets(secrets, config.pool_config());

    if pool.is_empty() {
        tracing::warn!(
            "[BOOTSTRAP] 没有加载到任何凭证: source={}",
            config.credentials.source.describe()
        );
    } else {
        tracing::info!(
            "[BOOTSTRAP] 已加载 {} 个凭证: source={}",
            pool.len(),
            config.credentials.source.describe()
        );
    }
    Ok(pool)
}

/// 使用 Gemini 上游装配组件
pub fn build_components(config: Config) -> Result<AppComponents, BootstrapError> {
    let provider = GeminiProvider::new(&config.upstream)?;
    tracing::info!(
        "[BOOTSTRAP] 上游: {}/{}",
        config.upstream.base_url,
        config.upstream.api_version
    );
    build_components_with_upstream(config, Arc::new(provider))
}

/// 使用指定上游装配组件
pub fn build_components_with_upstream(
    config: Config,
    upstream: Arc<dyn UpstreamClient>,
) -> Result<AppComponents, BootstrapError> {
    let pool = Arc::new(load_credentials(&config)?);
    let limiter = Arc::new(RateLimiter::new());
    let cache = Arc::new(ResponseCache::new(config.cache.clone()));
    let resolver = Arc::new(ModelResolver::from_config(&config.models));

    tracing::info!(
        "[BOOTSTRAP] 模型 {} 个（含别名），缓存 {}，调用方限流 {:?}，凭证限流 {:?}",
        resolver.len(),
        if config.cache.enabled { "开启" } else { "关闭" },
        config.rate_limit.caller,
        config.rate_limit.credential
    );

    let dispatcher = Arc::new(Dispatcher::new(
        resolver,
        Arc::clone(&limiter),
        Arc::clone(&cache),
        Arc::clone(&pool),
        upstream,
        DispatchConfig::from_config(&config),
    ));

    Ok(AppComponents {
        config,
        dispatcher,
        pool,
        limiter,
        cache,
    })
}
