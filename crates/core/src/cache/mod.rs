//! 响应缓存
//!
//! 按请求指纹索引上游响应，绝对 TTL 过期，可选容量上限。

pub mod fingerprint;
pub mod store;

pub use fingerprint::{Fingerprint, SHARED_SCOPE};
pub use store::{CacheConfig, CacheError, CacheEntry, CacheEntrySummary, CacheStats, ResponseCache};
