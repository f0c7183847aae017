//! 核心数据模型

pub mod gemini;
pub mod openai;
pub mod request;

pub use request::{
    CacheMode, CallerIdentity, CallerKind, Dialect, Message, NormalizedRequest, Part, Role,
    SamplingParams,
};
