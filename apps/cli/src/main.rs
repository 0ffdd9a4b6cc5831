//! # Startouch CLI
//!
//! Command-line interface for Startouch robot arm control.
//!
//! 每个命令独立执行（连接 -> 操作 -> 失能断开），Ctrl-C 时同样失能电机。
//!
//! ```bash
//! # 配置默认接口与标定目录
//! startouch-cli config set --can can0 --gripper true --calibration-dir ./params
//!
//! # 关节运动 / 末端位姿
//! startouch-cli move --joints 0.1,0.2,0.3,0.4,0.5,0.6 -t 2.0
//! startouch-cli pose --pos 0.3,0.0,0.25 --euler 3.14,0,0
//!
//! # 夹爪、状态、重力补偿
//! startouch-cli gripper set 0.5
//! startouch-cli state --json
//! startouch-cli gravity on --hold 30
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod connect;
mod safety;
mod validation;

use commands::{
    ConfigCommand, GravityCommand, GripperCommand, MoveCommand, PoseCommand, StateCommand,
};
use connect::ConnectArgs;

/// Startouch CLI - 机械臂命令行工具
#[derive(Parser, Debug)]
#[command(name = "startouch-cli")]
#[command(about = "Command-line interface for Startouch robot arm control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 回到零位（故障时先恢复）
    Home,

    /// 移动关节到目标位置
    Move {
        #[command(flatten)]
        args: MoveCommand,
    },

    /// 移动末端到目标位姿
    Pose {
        #[command(flatten)]
        args: PoseCommand,
    },

    /// 夹爪控制
    #[command(subcommand)]
    Gripper(GripperCommand),

    /// 查询当前状态
    State {
        #[command(flatten)]
        args: StateCommand,
    },

    /// 重力补偿
    Gravity {
        #[command(flatten)]
        args: GravityCommand,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("startouch_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let connect = &cli.connect;

    match cli.command {
        Commands::Config(cmd) => match &connect.config {
            Some(path) => cmd.execute_at(path),
            None => cmd.execute(),
        },
        Commands::Home => commands::motion::home(connect),
        Commands::Move { args } => args.execute(connect),
        Commands::Pose { args } => args.execute(connect),
        Commands::Gripper(cmd) => cmd.execute(connect),
        Commands::State { args } => args.execute(connect),
        Commands::Gravity { args } => args.execute(connect),
    }
}
