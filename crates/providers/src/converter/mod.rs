//! 协议转换
//!
//! 入站：OpenAI / 原生请求 -> `NormalizedRequest`；
//! 出站：`NormalizedRequest` -> generateContent 请求体，上游响应 -> OpenAI 响应。

pub mod gemini_to_openai;
pub mod native_to_normalized;
pub mod normalized_to_gemini;
pub mod openai_to_normalized;

pub use gemini_to_openai::{to_openai_chunks, to_openai_response};
pub use native_to_normalized::convert_native_request;
pub use normalized_to_gemini::build_generate_content_request;
pub use openai_to_normalized::convert_openai_request;

/// 请求转换错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvertError {
    #[error("不支持的消息角色: {0}")]
    InvalidRole(String),
    #[error("不支持的消息内容: {0}")]
    UnsupportedContent(String),
}
