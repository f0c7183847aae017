//! 模型路由
//!
//! 将客户端请求的模型名解析为上游的规范模型。

pub mod mapper;

pub use mapper::{CanonicalModel, KnownModel, ModelInfo, ModelResolver, ModelsConfig, ResolveError};
