//! Poolcast Server Crate
//!
//! axum HTTP 层：两种协议方言的入站接口、代理鉴权和管理接口。
//! 所有请求最终交给 `Dispatcher` 处理。

pub mod auth;
pub mod handlers;
pub mod response;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use poolcast_core::config::ServerConfig;
use poolcast_processor::Dispatcher;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// 请求体上限
const BODY_LIMIT: usize = 20 * 1024 * 1024;

/// 服务器错误
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("无效的监听地址 {addr}: {source}")]
    InvalidAddress {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("无法绑定到 {addr}: {source}。请检查端口是否被占用。")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("服务器运行失败: {0}")]
    Serve(#[source] std::io::Error),
}

/// 共享状态
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// 客户端 API Key（为空时不鉴权）
    pub api_keys: Arc<Vec<String>>,
    /// 管理密钥（未设置时管理接口返回 403）
    pub admin_key: Option<Arc<str>>,
    /// 关闭信号，请求级取消令牌从它派生
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        config: &ServerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            api_keys: Arc::new(config.api_keys.clone()),
            admin_key: config.admin_key.as_deref().map(Arc::from),
            shutdown,
        }
    }
}

/// 构建路由
pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/admin/credentials", get(handlers::list_credentials))
        .route(
            "/admin/credentials/:id/enable",
            post(handlers::enable_credential),
        )
        .route(
            "/admin/credentials/:id/disable",
            post(handlers::disable_credential),
        )
        .route(
            "/admin/cache",
            get(handlers::list_cache).delete(handlers::clear_cache),
        )
        .route("/admin/cache/stats", get(handlers::cache_stats))
        .route(
            "/admin/cache/:fingerprint",
            axum::routing::delete(handlers::invalidate_cache_entry),
        )
        .route(
            "/admin/cache/:fingerprint/touch",
            post(handlers::touch_cache_entry),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        // OpenAI 兼容接口
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        // 原生接口
        .route("/v1beta/models", get(handlers::list_native_models))
        .route("/v1beta/models/:action", post(handlers::generate_content))
        // 管理接口
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 启动 HTTP 服务，`state.shutdown` 触发后优雅退出
pub async fn run_server(host: &str, port: u16, state: AppState) -> Result<(), ServerError> {
    let addr_str = format!("{host}:{port}");
    let addr: SocketAddr = addr_str
        .parse()
        .map_err(|source| ServerError::InvalidAddress {
            addr: addr_str.clone(),
            source,
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr_str.clone(),
            source,
        })?;

    tracing::info!("[SERVER] 监听 {}", addr);

    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(ServerError::Serve)?;

    tracing::info!("[SERVER] 已停止");
    Ok(())
}
