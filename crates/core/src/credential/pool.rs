//! 凭证池实现
//!
//! 使用 DashMap 实现线程安全的凭证池管理。每个凭证的状态变更都在
//! DashMap 的条目写锁内完成，因此并发的成功/失败上报不会丢失计数。

use super::cooldown::CooldownConfig;
use super::types::{Credential, CredentialStatus, FailureKind};
use crate::ttl;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;

/// 凭证池配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 单个凭证的最大并发请求数（None 表示不限制）
    pub max_in_flight: Option<usize>,
    /// 冷却策略
    pub cooldown: CooldownConfig,
}

/// 凭证池状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolStatus {
    /// 总凭证数
    pub total: usize,
    /// 当前可选凭证数（含冷却已到期的凭证）
    pub active: usize,
    /// 冷却中凭证数
    pub cooling: usize,
    /// 已禁用凭证数
    pub disabled: usize,
    /// 进行中的请求数
    pub in_flight: usize,
    /// 最早恢复时间
    pub earliest_recovery: Option<DateTime<Utc>>,
}

/// 凭证池错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    /// 凭证已存在
    #[error("凭证已存在: {0}")]
    CredentialExists(String),
    /// 凭证不存在
    #[error("凭证不存在: {0}")]
    CredentialNotFound(String),
    /// 凭证池为空
    #[error("凭证池为空")]
    EmptyPool,
    /// 所有凭证不可用
    #[error("没有可用的凭证")]
    NoAvailableCredential,
}

impl PoolError {
    /// 是否表示凭证池已耗尽（没有可选凭证）
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::EmptyPool | PoolError::NoAvailableCredential)
    }
}

/// 凭证租约
///
/// `acquire` 的返回值，持有期间占用凭证的一个并发槽位，drop 时释放。
#[derive(Debug)]
pub struct CredentialLease {
    credential: Credential,
}

impl CredentialLease {
    /// 选中的凭证快照
    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}

impl Deref for CredentialLease {
    type Target = Credential;

    fn deref(&self) -> &Self::Target {
        &self.credential
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        self.credential.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 选择候选
struct Candidate {
    id: String,
    last_used_at: Option<DateTime<Utc>>,
    failure_count: u32,
    order: u64,
}

/// 尝试占用一个并发槽位
fn try_reserve(counter: &AtomicUsize, max_in_flight: Option<usize>) -> bool {
    match max_in_flight {
        None => {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        }
        Some(max) => counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok(),
    }
}

/// 凭证池 - 管理上游的多个凭证
pub struct CredentialPool {
    /// 凭证存储（id -> Credential）
    credentials: DashMap<String, Credential>,
    /// 插入序号
    next_order: AtomicU64,
    /// 配置
    config: PoolConfig,
}

impl CredentialPool {
    /// 创建新的凭证池
    pub fn new(config: PoolConfig) -> Self {
        Self {
            credentials: DashMap::new(),
            next_order: AtomicU64::new(0),
            config,
        }
    }

    /// 从密钥列表创建凭证池，重复的密钥会被跳过
    pub fn from_secrets<I, S>(secrets: I, config: PoolConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pool = Self::new(config);
        for secret in secrets {
            let credential = Credential::new(secret);
            if let Err(e) = pool.add(credential) {
                tracing::warn!("[POOL] 跳过重复凭证: {}", e);
            }
        }
        pool
    }

    /// 获取配置
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// 获取凭证池大小
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// 检查凭证池是否为空
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// 添加凭证到池中
    ///
    /// # 错误
    /// - 如果凭证 ID 已存在，返回 `PoolError::CredentialExists`
    pub fn add(&self, mut credential: Credential) -> Result<(), PoolError> {
        match self.credentials.entry(credential.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(PoolError::CredentialExists(credential.id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                credential.order = self.next_order.fetch_add(1, Ordering::SeqCst);
                slot.insert(credential);
                Ok(())
            }
        }
    }

    /// 从池中移除凭证
    ///
    /// # 错误
    /// - 如果凭证不存在，返回 `PoolError::CredentialNotFound`
    pub fn remove(&self, id: &str) -> Result<Credential, PoolError> {
        self.credentials
            .remove(id)
            .map(|(_, cred)| cred)
            .ok_or_else(|| PoolError::CredentialNotFound(id.to_string()))
    }

    /// 获取凭证快照
    pub fn get(&self, id: &str) -> Option<Credential> {
        self.credentials.get(id).map(|r| r.value().clone())
    }

    /// 检查凭证是否存在
    pub fn contains(&self, id: &str) -> bool {
        self.credentials.contains_key(id)
    }

    /// 获取所有凭证快照（按插入顺序）
    pub fn all(&self) -> Vec<Credential> {
        let mut all: Vec<Credential> = self.credentials.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|c| c.order);
        all
    }

    /// 获取所有凭证 ID（按插入顺序）
    pub fn ids(&self) -> Vec<String> {
        self.all().into_iter().map(|c| c.id).collect()
    }

    /// 选择一个凭证
    ///
    /// 见 [`CredentialPool::acquire_at`]。
    pub fn acquire(&self, excluding: &HashSet<String>) -> Result<CredentialLease, PoolError> {
        self.acquire_at(excluding, Utc::now())
    }

    /// 在给定时间点选择一个凭证
    ///
    /// 选择顺序：最久未使用优先（从未使用的最先），其次连续失败次数少的，
    /// 最后按插入顺序。冷却已到期的凭证在被选中时恢复为 `Active`。
    ///
    /// # 错误
    /// - 池为空时返回 `PoolError::EmptyPool`
    /// - `excluding` 之外没有可选凭证时返回 `PoolError::NoAvailableCredential`
    pub fn acquire_at(
        &self,
        excluding: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<CredentialLease, PoolError> {
        if self.credentials.is_empty() {
            return Err(PoolError::EmptyPool);
        }

        // 先收集候选再逐个加锁，避免持有迭代器时获取写锁
        let mut candidates: Vec<Candidate> = self
            .credentials
            .iter()
            .filter(|r| !excluding.contains(r.key()) && r.value().status.is_eligible_at(now))
            .map(|r| {
                let cred = r.value();
                Candidate {
                    id: cred.id.clone(),
                    last_used_at: cred.stats.last_used_at,
                    failure_count: cred.stats.failure_count,
                    order: cred.order,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.last_used_at
                .cmp(&b.last_used_at)
                .then(a.failure_count.cmp(&b.failure_count))
                .then(a.order.cmp(&b.order))
        });

        for candidate in candidates {
            let Some(mut entry) = self.credentials.get_mut(&candidate.id) else {
                continue;
            };

            // 收集之后状态可能已被并发修改
            if !entry.status.is_eligible_at(now) {
                continue;
            }

            if !try_reserve(&entry.in_flight, self.config.max_in_flight) {
                tracing::debug!("[POOL] 凭证并发已满，跳过: id={}", entry.id);
                continue;
            }

            if let CredentialStatus::Cooling { until } = entry.status {
                tracing::info!("[POOL] 凭证冷却结束，恢复为活跃: id={} until={}", entry.id, until);
                entry.status = CredentialStatus::Active;
            }

            return Ok(CredentialLease {
                credential: entry.clone(),
            });
        }

        Err(PoolError::NoAvailableCredential)
    }

    /// 记录凭证使用成功
    pub fn report_success(&self, id: &str) {
        self.report_success_at(id, Utc::now());
    }

    /// 在给定时间点记录凭证使用成功
    ///
    /// 清零连续失败次数并恢复为 `Active`；已禁用的凭证保持禁用。
    pub fn report_success_at(&self, id: &str, now: DateTime<Utc>) {
        let Some(mut entry) = self.credentials.get_mut(id) else {
            tracing::warn!("[POOL] 上报成功时凭证不存在: id={}", id);
            return;
        };

        entry.stats.record_success(now);
        if !matches!(entry.status, CredentialStatus::Disabled { .. }) {
            entry.status = CredentialStatus::Active;
        }
    }

    /// 记录凭证使用失败，`retry_after_secs` 为上游给出的重试提示
    pub fn report_failure(
        &self,
        id: &str,
        kind: FailureKind,
        retry_after_secs: Option<u64>,
    ) -> Option<CredentialStatus> {
        self.report_failure_at(id, kind, retry_after_secs, Utc::now())
    }

    /// 在给定时间点记录凭证使用失败，返回更新后的状态
    ///
    /// - 配额耗尽/限流：进入冷却，时长按连续失败次数指数退避，不短于重试提示
    /// - 临时错误：连续失败达到阈值后进入冷却
    /// - 密钥无效：立即禁用
    pub fn report_failure_at(
        &self,
        id: &str,
        kind: FailureKind,
        retry_after_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> Option<CredentialStatus> {
        let Some(mut entry) = self.credentials.get_mut(id) else {
            tracing::warn!("[POOL] 上报失败时凭证不存在: id={} kind={}", id, kind);
            return None;
        };

        let failures = entry.stats.record_failure(kind, now);
        let cooldown = &self.config.cooldown;

        match kind {
            FailureKind::InvalidCredential => {
                tracing::warn!("[POOL] 凭证无效，已禁用: id={}", entry.id);
                entry.status = CredentialStatus::Disabled {
                    reason: "上游拒绝该密钥（无效或已吊销）".to_string(),
                };
            }
            _ if matches!(entry.status, CredentialStatus::Disabled { .. }) => {}
            _ if kind.forces_cooldown() || failures >= cooldown.transient_failure_threshold => {
                let secs = cooldown.cooldown_secs_with_hint(failures, retry_after_secs);
                let mut until = ttl::saturating_deadline(now, secs);
                if let CredentialStatus::Cooling { until: current } = entry.status {
                    until = until.max(current);
                }
                tracing::warn!(
                    "[POOL] 凭证进入冷却: id={} kind={} failures={} until={}",
                    entry.id,
                    kind,
                    failures,
                    until
                );
                entry.status = CredentialStatus::Cooling { until };
            }
            _ => {
                tracing::debug!(
                    "[POOL] 凭证临时失败: id={} failures={}/{}",
                    entry.id,
                    failures,
                    cooldown.transient_failure_threshold
                );
            }
        }

        Some(entry.status.clone())
    }

    /// 管理操作：恢复凭证为活跃状态并清零失败计数
    pub fn enable(&self, id: &str) -> Result<(), PoolError> {
        let mut entry = self
            .credentials
            .get_mut(id)
            .ok_or_else(|| PoolError::CredentialNotFound(id.to_string()))?;

        entry.status = CredentialStatus::Active;
        entry.stats.failure_count = 0;
        tracing::info!("[POOL] 凭证已启用: id={}", id);
        Ok(())
    }

    /// 管理操作：禁用凭证
    pub fn disable(&self, id: &str, reason: impl Into<String>) -> Result<(), PoolError> {
        let mut entry = self
            .credentials
            .get_mut(id)
            .ok_or_else(|| PoolError::CredentialNotFound(id.to_string()))?;

        entry.status = CredentialStatus::Disabled {
            reason: reason.into(),
        };
        tracing::info!("[POOL] 凭证已禁用: id={}", id);
        Ok(())
    }

    /// 获取池状态
    pub fn status(&self) -> PoolStatus {
        self.status_at(Utc::now())
    }

    /// 在给定时间点获取池状态
    pub fn status_at(&self, now: DateTime<Utc>) -> PoolStatus {
        let mut status = PoolStatus {
            total: self.credentials.len(),
            active: 0,
            cooling: 0,
            disabled: 0,
            in_flight: 0,
            earliest_recovery: None,
        };

        for entry in self.credentials.iter() {
            let cred = entry.value();
            status.in_flight += cred.in_flight();
            match &cred.status {
                s if s.is_eligible_at(now) => status.active += 1,
                CredentialStatus::Cooling { until } => {
                    status.cooling += 1;
                    status.earliest_recovery = Some(
                        status
                            .earliest_recovery
                            .map_or(*until, |current| current.min(*until)),
                    );
                }
                _ => status.disabled += 1,
            }
        }

        status
    }

    /// 获取最早恢复时间（当前仍在冷却的凭证中）
    pub fn earliest_recovery(&self) -> Option<DateTime<Utc>> {
        self.status().earliest_recovery
    }
}
