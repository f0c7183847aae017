//! 后台维护任务
//!
//! 定期清理空闲的限流窗口和过期的缓存条目，并输出凭证池状态。

use chrono::Utc;
use poolcast_core::cache::ResponseCache;
use poolcast_core::credential::CredentialPool;
use poolcast_core::rate_limit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 执行一轮维护，返回（清理的限流窗口数，清理的缓存条目数）
pub fn run_maintenance_once(
    limiter: &RateLimiter,
    cache: &ResponseCache,
    pool: &CredentialPool,
    idle_ttl_secs: u64,
) -> (usize, usize) {
    let now = Utc::now();
    let windows = limiter.purge_idle(idle_ttl_secs, now);
    let entries = cache.purge_expired(now);
    let status = pool.status_at(now);

    if windows > 0 || entries > 0 {
        tracing::debug!(
            "[MAINTENANCE] 清理限流窗口 {} 个，过期缓存 {} 条",
            windows,
            entries
        );
    }
    tracing::debug!(
        "[POOL] 状态: total={}, active={}, cooling={}, disabled={}, in_flight={}",
        status.total,
        status.active,
        status.cooling,
        status.disabled,
        status.in_flight
    );
    if status.total > 0 && status.active == 0 && status.cooling == 0 {
        tracing::warn!("[POOL] 所有凭证均已禁用");
    }

    (windows, entries)
}

/// 启动维护任务，`shutdown` 触发后退出
pub fn spawn_maintenance_task(
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    pool: Arc<CredentialPool>,
    idle_ttl_secs: u64,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 第一次 tick 立即返回
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("[MAINTENANCE] 维护任务已停止");
                    break;
                }
                _ = ticker.tick() => {
                    run_maintenance_once(&limiter, &cache, &pool, idle_ttl_secs);
                }
            }
        }
    })
}
