//! 凭证池核心类型和独立逻辑
//!
//! 包含凭证类型定义、冷却策略和凭证池管理。

pub mod cooldown;
pub mod pool;
pub mod types;

pub use cooldown::CooldownConfig;
pub use pool::{CredentialLease, CredentialPool, PoolConfig, PoolError, PoolStatus};
pub use types::{
    credential_id_for, mask_secret, Credential, CredentialStats, CredentialStatus, FailureKind,
    SecretKey,
};
