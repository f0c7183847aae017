//! Poolcast - 生成式 AI API 凭证池网关
//!
//! 在一组上游 API Key 前面提供 OpenAI 兼容接口和原生接口，
//! 负责凭证选择、限流、响应缓存和失败重试。
//!
//! ## Workspace 结构
//! - `poolcast-core`: 数据模型、凭证池、限流器、缓存、模型解析、配置
//! - `poolcast-providers`: 上游客户端和协议转换
//! - `poolcast-processor`: 请求调度
//! - `poolcast-server`: HTTP 层
//! - 主 crate: 启动引导和运行器

pub mod app;

pub use poolcast_core::{Config, ConfigError};
