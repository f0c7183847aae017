//! poolcast 命令行入口

use clap::Parser;
use poolcast_lib::app::{self, RunOptions};
use std::path::PathBuf;

/// 凭证池网关
#[derive(Parser, Debug)]
#[command(name = "poolcast")]
#[command(about = "Credential-pooling gateway for generative AI APIs")]
#[command(version)]
struct Args {
    /// 配置文件路径（默认读取 POOLCAST_CONFIG 或 ~/.poolcast/config.yaml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 覆盖监听地址
    #[arg(long)]
    host: Option<String>,

    /// 覆盖监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 只校验配置和凭证，不启动服务
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    app::run(RunOptions {
        config_path: args.config,
        host: args.host,
        port: args.port,
        check_only: args.check,
    })
    .await
}
