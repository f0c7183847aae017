//! 秒数到时间点的换算
//!
//! 配置和管理接口传入的秒数都是 `u64`，直接转成 chrono 时长可能溢出。
//! 这里统一做有界换算。

use chrono::{DateTime, Duration, Utc};

/// 允许的最长时长（秒），约 10 年
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// 秒数转为时长，超出 `MAX_DURATION_SECS` 时返回 None
pub fn seconds(secs: u64) -> Option<Duration> {
    if secs > MAX_DURATION_SECS {
        return None;
    }
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// `now + secs`，超出范围时返回 None
pub fn deadline_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    now.checked_add_signed(seconds(secs)?)
}

/// `now + secs`，秒数截断到 `MAX_DURATION_SECS`，结果饱和到最大可表示时间
pub fn saturating_deadline(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    deadline_after(now, secs.min(MAX_DURATION_SECS)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
