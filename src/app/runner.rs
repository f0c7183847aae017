//! 应用运行器
//!
//! 启动 HTTP 服务和后台维护任务，收到 Ctrl+C / SIGTERM 后统一关闭。

use super::bootstrap::{build_components, load_config};
use anyhow::Context;
use poolcast_core::logger::init_tracing;
use poolcast_processor::spawn_maintenance_task;
use poolcast_server::{run_server, AppState};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 维护任务间隔
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// 运行参数
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// 只校验配置和凭证
    pub check_only: bool,
}

/// 运行应用直到收到退出信号
pub async fn run(options: RunOptions) -> anyhow::Result<()> {
    let mut config = load_config(options.config_path).context("加载配置失败")?;
    if let Some(host) = options.host {
        config.server.host = host;
    }
    if let Some(port) = options.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);
    tracing::info!("[BOOTSTRAP] poolcast v{}", env!("CARGO_PKG_VERSION"));

    let components = build_components(config).context("组件初始化失败")?;
    if options.check_only {
        let status = components.pool.status();
        tracing::info!(
            "[BOOTSTRAP] 配置校验通过: 凭证 {} 个，监听 {}",
            status.total,
            components.config.bind_address()
        );
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let maintenance = spawn_maintenance_task(
        components.limiter.clone(),
        components.cache.clone(),
        components.pool.clone(),
        components.config.rate_limit.idle_ttl_secs,
        MAINTENANCE_INTERVAL,
        shutdown.clone(),
    );

    tokio::spawn(watch_shutdown_signal(shutdown.clone()));

    let state = AppState::new(
        components.dispatcher.clone(),
        &components.config.server,
        shutdown.clone(),
    );
    let served = run_server(
        &components.config.server.host,
        components.config.server.port,
        state,
    )
    .await;

    shutdown.cancel();
    if let Err(e) = maintenance.await {
        tracing::warn!("[BOOTSTRAP] 维护任务异常退出: {}", e);
    }

    served.context("HTTP 服务异常退出")
}

/// 等待退出信号
async fn watch_shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[BOOTSTRAP] 无法监听 Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("[BOOTSTRAP] 无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => return,
    }

    tracing::info!("[BOOTSTRAP] 收到退出信号，正在关闭");
    shutdown.cancel();
}
