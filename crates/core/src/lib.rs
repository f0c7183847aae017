//! Poolcast Core Crate
//!
//! 包含纯数据类型和调度核心的同步组件，不依赖 HTTP 层。
//!
//! ## 模块结构
//! - `models`: 归一化请求及两种协议方言的数据模型
//! - `credential`: 凭证类型、冷却策略和凭证池
//! - `rate_limit`: 固定窗口限流器
//! - `cache`: 请求指纹和响应缓存
//! - `router`: 模型别名解析
//! - `errors`: 面向客户端的错误模型
//! - `config`: YAML 配置
//! - `logger`: 日志初始化和脱敏
//! - `ttl`: 有界的秒数换算

pub mod logger;
pub mod models;

pub mod cache;
pub mod config;
pub mod credential;
pub mod errors;
pub mod rate_limit;
pub mod router;
pub mod ttl;

// 重新导出常用类型
pub use config::{Config, ConfigError};
pub use models::*;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
