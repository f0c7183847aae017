//! 错误类型模块
//!
//! ## 模块结构
//! - `gateway_error`: 面向客户端的统一错误模型

pub mod gateway_error;

pub use gateway_error::{GatewayError, GatewayErrorCode, GatewayErrorResponse};
