//! Poolcast Providers Crate
//!
//! 上游调用接口、Gemini 客户端、上游错误分类和协议转换。

pub mod classify;
pub mod converter;
pub mod providers;
pub mod upstream;

pub use providers::{GeminiProvider, ProviderError};
pub use upstream::{UpstreamClient, UpstreamErrorKind, UpstreamFailure, UpstreamOutcome};
