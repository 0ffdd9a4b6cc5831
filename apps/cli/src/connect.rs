//! 会话建立
//!
//! 每个命令独立执行：
//! 1. 读取配置（命令行参数覆盖）
//! 2. 建立会话（加载标定、使能电机、启动控制线程）
//! 3. 执行操作
//! 4. 清理（失能电机）
//!
//! Ctrl-C 时同样执行清理后退出。

use anyhow::{Context, Result};
use clap::Args;
use startouch_sdk::{ArmConfig, ArmSession};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::commands::config;

/// 连接参数（覆盖配置文件）
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// CAN 接口
    #[arg(short, long, global = true)]
    pub interface: Option<String>,

    /// 配置文件路径（默认 `<config_dir>/startouch/arm.toml`）
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,
}

impl ConnectArgs {
    /// 合并配置文件与命令行参数
    pub fn resolve(&self) -> Result<ArmConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => config::config_file()?,
        };
        let mut arm = config::load(&path)?;
        if let Some(iface) = &self.interface {
            arm.can_interface = iface.clone();
        }
        Ok(arm)
    }

    /// 建立会话并注册 Ctrl-C 清理
    pub fn open(&self) -> Result<Arc<ArmSession>> {
        let arm = self.resolve()?;
        println!("🔌 连接到机械臂 ({})...", arm.can_interface);
        let session = Arc::new(ArmSession::new(arm).context("建立会话失败")?);

        let handle = Arc::clone(&session);
        ctrlc::set_handler(move || {
            warn!("Interrupted, disabling motors");
            handle.cleanup();
            std::process::exit(130);
        })
        .context("注册 Ctrl-C 处理失败")?;

        Ok(session)
    }
}

/// 等待运动结束（轨迹时长 + 余量）
pub fn wait_motion(session: &ArmSession, duration: f64) -> Result<()> {
    let timeout = Duration::from_secs_f64(duration.max(0.0)) + Duration::from_secs(2);
    session.wait_for_motion(timeout).context("等待运动完成失败")?;
    Ok(())
}
