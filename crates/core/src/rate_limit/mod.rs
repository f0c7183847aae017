//! 固定窗口限流器
//!
//! 每个作用域（`caller:*` 或 `credential:*`）一个窗口，窗口按需创建，
//! 检查与计数在同一个 DashMap 条目锁内完成。

use crate::ttl;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// 限流规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// 窗口内允许的请求数
    pub limit: u32,
    /// 窗口长度（秒）
    pub period_secs: u64,
}

impl RateLimitRule {
    pub fn new(limit: u32, period_secs: u64) -> Self {
        Self { limit, period_secs }
    }

    /// 每分钟 N 次
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, 60)
    }
}

/// 准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Admission {
    /// 允许，附带窗口内剩余次数
    Allowed { remaining: u32 },
    /// 拒绝，附带建议重试等待秒数（至少 1）
    Denied { retry_after_secs: u64 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// 限流窗口
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitWindow {
    /// 窗口起始时间
    pub window_start: DateTime<Utc>,
    /// 窗口内已准入次数
    pub count: u32,
    /// 窗口上限
    pub limit: u32,
    /// 窗口长度（秒）
    pub period_secs: u64,
    /// 最后访问时间
    pub last_seen: DateTime<Utc>,
}

impl RateLimitWindow {
    fn fresh(limit: u32, period_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count: 0,
            limit,
            period_secs,
            last_seen: now,
        }
    }

    /// 窗口结束时间
    pub fn window_end(&self) -> DateTime<Utc> {
        ttl::saturating_deadline(self.window_start, self.period_secs)
    }
}

/// 限流器
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, RateLimitWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 凭证作用域
    pub fn credential_scope(credential_id: &str) -> String {
        format!("credential:{credential_id}")
    }

    /// 尝试准入一次请求
    pub fn admit(&self, scope: &str, rule: RateLimitRule) -> Admission {
        self.admit_at(scope, rule, Utc::now())
    }

    /// 在给定时间点尝试准入一次请求
    ///
    /// 窗口过期后重置计数并以 `now` 作为新窗口起点。`limit` 为 0 时全部拒绝。
    pub fn admit_at(&self, scope: &str, rule: RateLimitRule, now: DateTime<Utc>) -> Admission {
        let mut window = self
            .windows
            .entry(scope.to_string())
            .or_insert_with(|| RateLimitWindow::fresh(rule.limit, rule.period_secs, now));

        // 规则变化（配置重载）时同步到窗口
        window.limit = rule.limit;
        window.period_secs = rule.period_secs;
        window.last_seen = now;

        if now >= window.window_end() {
            window.window_start = now;
            window.count = 0;
        }

        if window.count < window.limit {
            window.count += 1;
            return Admission::Allowed {
                remaining: window.limit - window.count,
            };
        }

        let wait_ms = u64::try_from((window.window_end() - now).num_milliseconds()).unwrap_or(0);
        let retry_after_secs = wait_ms.div_ceil(1000).max(1);
        tracing::debug!(
            "[RATE_LIMIT] 拒绝: scope={} count={}/{} retry_after={}s",
            scope,
            window.count,
            window.limit,
            retry_after_secs
        );
        Admission::Denied { retry_after_secs }
    }

    /// 获取窗口快照
    pub fn window(&self, scope: &str) -> Option<RateLimitWindow> {
        self.windows.get(scope).map(|w| w.value().clone())
    }

    /// 清理空闲超过 `idle_ttl_secs` 且已结束的窗口，返回清理数量
    ///
    /// 未结束的窗口始终保留，否则计数被提前清零。
    pub fn purge_idle(&self, idle_ttl_secs: u64, now: DateTime<Utc>) -> usize {
        let cutoff = ttl::seconds(idle_ttl_secs)
            .and_then(|idle| now.checked_sub_signed(idle))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.windows.len();
        self.windows.retain(|_, w| now < w.window_end() || w.last_seen > cutoff);
        let purged = before.saturating_sub(self.windows.len());
        if purged > 0 {
            tracing::debug!("[RATE_LIMIT] 清理空闲窗口: {}", purged);
        }
        purged
    }

    /// 窗口数量
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
