//! 响应缓存存储
//!
//! 插入有序的 IndexMap：命中时条目移动到末尾，容量满时从头部淘汰。
//! 所有操作在同一把 parking_lot 互斥锁内完成，不跨越 await。

use super::fingerprint::{Fingerprint, SHARED_SCOPE};
use crate::models::{CacheMode, CallerIdentity, NormalizedRequest};
use crate::ttl;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 缓存操作错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("TTL 超出范围: {ttl_secs} 秒（最大 {max} 秒）")]
    TtlOutOfRange { ttl_secs: u64, max: u64 },
}

fn expiry_for(now: DateTime<Utc>, ttl_secs: u64) -> Result<DateTime<Utc>, CacheError> {
    ttl::deadline_after(now, ttl_secs).ok_or(CacheError::TtlOutOfRange {
        ttl_secs,
        max: ttl::MAX_DURATION_SECS,
    })
}

/// 缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 是否启用缓存
    pub enabled: bool,
    /// 默认 TTL（秒）
    pub default_ttl_secs: u64,
    /// 最大条目数（None 表示不限制）
    pub max_entries: Option<usize>,
    /// 所有调用方共享缓存
    pub shared: bool,
    /// 只缓存确定性请求（temperature == 0）
    pub deterministic_only: bool,
    /// 是否缓存流式请求
    pub cache_streaming: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 300,
            max_entries: Some(1000),
            shared: false,
            deterministic_only: false,
            cache_streaming: false,
        }
    }
}

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    /// 作用域（调用方或共享）
    pub scope: String,
    /// 规范模型 ID
    pub model: String,
    /// 上游响应
    pub payload: Arc<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    /// 绝对过期时间
    pub expires_at: DateTime<Utc>,
    /// 命中次数
    pub hits: u64,
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 缓存条目摘要（管理接口，不含响应体）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntrySummary {
    pub fingerprint: Fingerprint,
    pub scope: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub hits: u64,
    pub last_accessed_at: DateTime<Utc>,
}

impl From<&CacheEntry> for CacheEntrySummary {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            fingerprint: entry.fingerprint.clone(),
            scope: entry.scope.clone(),
            model: entry.model.clone(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            ttl_secs: entry.ttl_secs,
            hits: entry.hits,
            last_accessed_at: entry.last_accessed_at,
        }
    }
}

/// 缓存统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub max_entries: Option<usize>,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
}

/// 响应缓存
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    entries: Mutex<IndexMap<Fingerprint, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(IndexMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// 调用方对应的缓存作用域
    pub fn scope_for(&self, caller: &CallerIdentity) -> String {
        if self.config.shared {
            SHARED_SCOPE.to_string()
        } else {
            caller.scope_id()
        }
    }

    /// 请求是否参与缓存（查询和写入）
    pub fn is_cacheable(&self, request: &NormalizedRequest) -> bool {
        self.config.enabled
            && request.cache_mode != CacheMode::Bypass
            && (!request.stream || self.config.cache_streaming)
            && (!self.config.deterministic_only || request.sampling.is_deterministic())
    }

    /// 查询缓存
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.lookup_at(fingerprint, Utc::now())
    }

    /// 在给定时间点查询缓存，过期条目视为不存在并被移除
    pub fn lookup_at(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();

        let Some(mut entry) = entries.shift_remove(fingerprint) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired_at(now) {
            tracing::debug!("[CACHE] 条目已过期: fingerprint={}", fingerprint.short());
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        entry.hits += 1;
        entry.last_accessed_at = now;
        let snapshot = entry.clone();
        entries.insert(fingerprint.clone(), entry);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(snapshot)
    }

    /// 写入缓存（`ttl_secs` 为 None 时使用默认 TTL）
    pub fn store(
        &self,
        fingerprint: Fingerprint,
        scope: &str,
        model: &str,
        payload: impl Into<Arc<serde_json::Value>>,
        ttl_secs: Option<u64>,
    ) {
        self.store_at(fingerprint, scope, model, payload, ttl_secs, Utc::now());
    }

    /// 在给定时间点写入缓存，已存在的指纹被原子替换
    pub fn store_at(
        &self,
        fingerprint: Fingerprint,
        scope: &str,
        model: &str,
        payload: impl Into<Arc<serde_json::Value>>,
        ttl_secs: Option<u64>,
        now: DateTime<Utc>,
    ) {
        let ttl_secs = ttl_secs.unwrap_or(self.config.default_ttl_secs);
        if ttl_secs == 0 {
            return;
        }
        let expires_at = match expiry_for(now, ttl_secs) {
            Ok(expires_at) => expires_at,
            Err(e) => {
                tracing::warn!(
                    "[CACHE] 跳过写入: fingerprint={}, {}",
                    fingerprint.short(),
                    e
                );
                return;
            }
        };

        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            scope: scope.to_string(),
            model: model.to_string(),
            payload: payload.into(),
            created_at: now,
            ttl_secs,
            expires_at,
            hits: 0,
            last_accessed_at: now,
        };

        let mut entries = self.entries.lock();
        entries.shift_remove(&fingerprint);

        if let Some(max) = self.config.max_entries {
            if entries.len() >= max {
                entries.retain(|_, e| !e.is_expired_at(now));
            }
            while !entries.is_empty() && entries.len() >= max {
                if let Some((evicted, _)) = entries.shift_remove_index(0) {
                    tracing::debug!("[CACHE] 容量已满，淘汰: fingerprint={}", evicted.short());
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
            if max == 0 {
                return;
            }
        }

        entries.insert(fingerprint, entry);
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// 删除单个条目
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.lock().shift_remove(fingerprint).is_some()
    }

    /// 删除某个作用域下的全部条目，返回删除数量
    pub fn invalidate_all(&self, scope: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.scope != scope);
        before - entries.len()
    }

    /// 延长条目有效期
    pub fn touch(
        &self,
        fingerprint: &Fingerprint,
        ttl_secs: Option<u64>,
    ) -> Result<bool, CacheError> {
        self.touch_at(fingerprint, ttl_secs, Utc::now())
    }

    /// 在给定时间点延长条目有效期：`expires_at = now + ttl`
    ///
    /// 条目不存在或已过期时返回 `Ok(false)`；TTL 超出范围时不修改条目。
    pub fn touch_at(
        &self,
        fingerprint: &Fingerprint,
        ttl_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<bool, CacheError> {
        let ttl_secs = ttl_secs.unwrap_or(self.config.default_ttl_secs);
        let expires_at = expiry_for(now, ttl_secs)?;
        let mut entries = self.entries.lock();
        match entries.get_mut(fingerprint) {
            Some(entry) if !entry.is_expired_at(now) => {
                entry.ttl_secs = ttl_secs;
                entry.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// 列出未过期条目
    pub fn list(&self) -> Vec<CacheEntrySummary> {
        self.list_at(Utc::now())
    }

    pub fn list_at(&self, now: DateTime<Utc>) -> Vec<CacheEntrySummary> {
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired_at(now))
            .map(CacheEntrySummary::from)
            .collect()
    }

    /// 清理过期条目，返回清理数量
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        let purged = before - entries.len();
        if purged > 0 {
            tracing::debug!("[CACHE] 清理过期条目: {}", purged);
        }
        purged
    }

    /// 清空缓存，返回清理数量
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.config.enabled,
            entries: self.len(),
            max_entries: self.config.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
