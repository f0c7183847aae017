//! Poolcast Processor Crate
//!
//! 请求调度核心：把归一化请求分派到凭证池中的某个上游凭证。
//!
//! ## 模块结构
//! - `context`: 单个请求的调度上下文和状态
//! - `dispatcher`: 调度器
//! - `error`: 调度错误
//! - `maintenance`: 后台维护任务

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod maintenance;

pub use context::{DispatchState, RequestContext};
pub use dispatcher::{DispatchConfig, DispatchResponse, Dispatcher};
pub use error::DispatchError;
pub use maintenance::{run_maintenance_once, spawn_maintenance_task};
