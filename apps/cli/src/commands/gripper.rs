//! 夹爪命令

use anyhow::{Result, bail};
use clap::Subcommand;
use std::time::Duration;

use crate::connect::ConnectArgs;

/// 夹爪命令
#[derive(Subcommand, Debug)]
pub enum GripperCommand {
    /// 张开
    Open,
    /// 闭合
    Close,
    /// 设定开度 `[0, 1]`
    Set {
        #[arg(allow_negative_numbers = true)]
        position: f64,

        /// 直接下发（不规划）
        #[arg(long)]
        raw: bool,
    },
}

impl GripperCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        if !connect.resolve()?.gripper_exist {
            bail!("配置中未启用夹爪（startouch-cli config set --gripper true）");
        }
        let session = connect.open()?;
        let start = session.get_gripper_position()?;

        let target = match *self {
            GripperCommand::Open => session.open_gripper()?,
            GripperCommand::Close => session.close_gripper()?,
            GripperCommand::Set { position, raw: false } => session.set_gripper_position(position)?,
            GripperCommand::Set { position, raw: true } => session.set_gripper_position_raw(position)?,
        };
        if let GripperCommand::Set { position, .. } = *self {
            if position != target {
                println!("⚠️  开度 {:.3} 超出范围，已截断为 {:.3}", position, target);
            }
        }

        // 等待规划结束
        let gripper = session.config().gripper.clone();
        let duration = ((target - start).abs() / gripper.speed).max(gripper.min_duration);
        std::thread::sleep(Duration::from_secs_f64(duration) + Duration::from_millis(200));

        println!("✅ 夹爪开度: {:.3}", session.get_gripper_position()?);
        session.cleanup();
        Ok(())
    }
}
