//! 凭证相关类型定义
//!
//! 定义凭证、密钥、凭证状态、失败类型等核心类型

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 脱敏显示密钥：保留前 4 位和后 4 位
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

/// 由密钥派生稳定的凭证 ID
pub fn credential_id_for(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    format!("key-{}", &hex::encode(digest)[..8])
}

/// 上游密钥
///
/// `Debug` 和 `Serialize` 只输出脱敏形式，原文仅通过 `expose()` 获取。
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// 获取密钥原文（仅用于调用上游）
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// 脱敏指纹
    pub fn masked(&self) -> String {
        mask_secret(&self.0)
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({})", self.masked())
    }
}

impl Serialize for SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.masked())
    }
}

/// 凭证状态
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CredentialStatus {
    /// 活跃可用
    Active,
    /// 冷却中（配额超限、限流或连续失败）
    Cooling {
        /// 冷却结束时间
        until: DateTime<Utc>,
    },
    /// 已禁用（密钥被吊销或格式错误），只能由管理操作恢复
    Disabled {
        /// 禁用原因
        reason: String,
    },
}

impl CredentialStatus {
    /// 在给定时间点是否可被选中
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            CredentialStatus::Active => true,
            CredentialStatus::Cooling { until } => *until <= now,
            CredentialStatus::Disabled { .. } => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::Cooling { .. } => "cooling",
            CredentialStatus::Disabled { .. } => "disabled",
        }
    }
}

/// 失败类型（由调度器对上游结果分类后上报）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 上游报告配额耗尽
    QuotaExhausted,
    /// 上游报告限流
    RateLimited,
    /// 超时、5xx、网络错误
    Transient,
    /// 密钥无效（吊销、格式错误）
    InvalidCredential,
}

impl FailureKind {
    /// 是否直接进入冷却
    pub fn forces_cooldown(&self) -> bool {
        matches!(self, FailureKind::QuotaExhausted | FailureKind::RateLimited)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::QuotaExhausted => write!(f, "quota_exhausted"),
            FailureKind::RateLimited => write!(f, "rate_limited"),
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::InvalidCredential => write!(f, "invalid_credential"),
        }
    }
}

/// 凭证统计信息
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct CredentialStats {
    /// 成功调用次数
    pub usage_count: u64,
    /// 连续失败次数（成功后清零）
    pub failure_count: u32,
    /// 累计失败次数
    pub total_failures: u64,
    /// 最后一次成功使用时间
    pub last_used_at: Option<DateTime<Utc>>,
    /// 最后一次失败时间
    pub last_failure_at: Option<DateTime<Utc>>,
    /// 最后一次失败类型
    pub last_failure_kind: Option<FailureKind>,
}

impl CredentialStats {
    /// 记录成功请求
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.usage_count += 1;
        self.failure_count = 0;
        self.last_used_at = Some(now);
    }

    /// 记录失败请求，返回新的连续失败次数
    pub fn record_failure(&mut self, kind: FailureKind, now: DateTime<Utc>) -> u32 {
        self.failure_count = self.failure_count.saturating_add(1);
        self.total_failures += 1;
        self.last_failure_at = Some(now);
        self.last_failure_kind = Some(kind);
        self.failure_count
    }
}

/// 凭证 - 表示单个上游 API Key
#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    /// 唯一标识符（由密钥哈希派生）
    pub id: String,
    /// 密钥（序列化时脱敏）
    #[serde(rename = "key")]
    pub secret: SecretKey,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 当前状态
    pub status: CredentialStatus,
    /// 统计信息
    pub stats: CredentialStats,
    /// 插入顺序（选择策略的最后一级排序）
    #[serde(skip)]
    pub(crate) order: u64,
    /// 当前占用的并发槽位
    #[serde(skip)]
    pub(crate) in_flight: Arc<AtomicUsize>,
}

impl Credential {
    /// 从密钥创建新凭证
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = SecretKey::new(secret);
        Self {
            id: credential_id_for(secret.expose()),
            secret,
            created_at: Utc::now(),
            status: CredentialStatus::Active,
            stats: CredentialStats::default(),
            order: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 使用指定 ID（测试和手工配置时使用）
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 当前是否处于活跃状态
    pub fn is_available(&self) -> bool {
        matches!(self.status, CredentialStatus::Active)
    }

    /// 当前占用的并发槽位数
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 冷却结束时间
    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        match self.status {
            CredentialStatus::Cooling { until } => Some(until),
            _ => None,
        }
    }
}
