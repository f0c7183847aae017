//! 上游 Provider 实现

pub mod gemini;

pub use gemini::GeminiProvider;

/// Provider 构建错误
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider 配置错误: {0}")]
    Configuration(String),
    #[error("HTTP 客户端创建失败: {0}")]
    Client(#[from] reqwest::Error),
}
