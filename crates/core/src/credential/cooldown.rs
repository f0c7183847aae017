//! 冷却策略
//!
//! 指数退避计算冷却时长：`base * factor^(n-1)`，上限 `max`。
//! 上游给出 `Retry-After` 时取两者较大值，同样受 `max` 限制。

use crate::ttl;
use serde::{Deserialize, Serialize};

/// 冷却配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// 基础冷却时间（秒）
    pub base_cooldown_secs: u64,
    /// 最大冷却时间（秒）
    pub max_cooldown_secs: u64,
    /// 冷却时间增长因子（指数退避）
    pub backoff_factor: f64,
    /// 临时错误连续达到该次数后进入冷却
    pub transient_failure_threshold: u32,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base_cooldown_secs: 30,         // 30 秒
            max_cooldown_secs: 1800,        // 30 分钟
            backoff_factor: 2.0,            // 指数退避因子
            transient_failure_threshold: 3, // 连续 3 次临时错误 -> 冷却
        }
    }
}

impl CooldownConfig {
    fn max_secs(&self) -> u64 {
        self.max_cooldown_secs.min(ttl::MAX_DURATION_SECS)
    }

    /// 按连续失败次数计算冷却时长（秒）
    pub fn cooldown_secs(&self, failure_count: u32) -> u64 {
        let max = self.max_secs();
        let exponent = failure_count.saturating_sub(1).min(32) as i32;
        let secs = self.base_cooldown_secs as f64 * self.backoff_factor.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= max as f64 {
            max
        } else {
            secs.round() as u64
        }
    }

    /// 结合上游 `Retry-After` 提示计算冷却时长（秒）
    pub fn cooldown_secs_with_hint(
        &self,
        failure_count: u32,
        retry_after_secs: Option<u64>,
    ) -> u64 {
        let hint = retry_after_secs.unwrap_or(0).min(self.max_secs());
        self.cooldown_secs(failure_count).max(hint)
    }

}

#[cfg(test)]
mod cooldown_tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let config = CooldownConfig::default();
        assert_eq!(config.cooldown_secs(1), 30);
        assert_eq!(config.cooldown_secs(2), 60);
        assert_eq!(config.cooldown_secs(3), 120);
        assert_eq!(config.cooldown_secs(0), 30);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = CooldownConfig::default();
        assert_eq!(config.cooldown_secs(7), 1800);
        assert_eq!(config.cooldown_secs(u32::MAX), 1800);
    }

    #[test]
    fn test_custom_parameters() {
        let config = CooldownConfig {
            base_cooldown_secs: 10,
            max_cooldown_secs: 100,
            backoff_factor: 3.0,
            transient_failure_threshold: 1,
        };
        assert_eq!(config.cooldown_secs(1), 10);
        assert_eq!(config.cooldown_secs(2), 30);
        assert_eq!(config.cooldown_secs(3), 90);
        assert_eq!(config.cooldown_secs(4), 100);
    }

    #[test]
    fn test_retry_after_hint_extends_cooldown() {
        let config = CooldownConfig::default();
        assert_eq!(config.cooldown_secs_with_hint(1, Some(120)), 120);
        assert_eq!(config.cooldown_secs_with_hint(1, Some(5)), 30);
        assert_eq!(config.cooldown_secs_with_hint(2, None), 60);
        // 提示同样受上限约束
        assert_eq!(config.cooldown_secs_with_hint(1, Some(u64::MAX)), 1800);
    }

    #[test]
    fn test_huge_max_cooldown_is_bounded() {
        let config = CooldownConfig {
            base_cooldown_secs: u64::MAX,
            max_cooldown_secs: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.cooldown_secs(1), ttl::MAX_DURATION_SECS);
        assert_eq!(config.cooldown_secs(u32::MAX), ttl::MAX_DURATION_SECS);
    }
}
