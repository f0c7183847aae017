//! 应用核心模块
//!
//! ## 模块结构
//! - `bootstrap` - 启动引导（配置加载、凭证加载、组件装配）
//! - `runner` - 运行器（HTTP 服务、维护任务、信号处理）

pub mod bootstrap;
pub mod runner;

pub use bootstrap::{
    build_components, build_components_with_upstream, load_config, load_credentials, AppComponents,
    BootstrapError,
};
pub use runner::{run, RunOptions};
