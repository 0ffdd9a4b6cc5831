//! 重力补偿命令
//!
//! 开启后保持当前姿态 `--hold` 秒（0 表示直到 Ctrl-C）

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use std::time::{Duration, Instant};

use crate::connect::ConnectArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

/// 重力补偿参数
#[derive(Args, Debug)]
pub struct GravityCommand {
    pub switch: Switch,

    /// 保持时长（s）
    #[arg(long, default_value_t = 10.0)]
    pub hold: f64,
}

impl GravityCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        if !self.hold.is_finite() || self.hold < 0.0 {
            bail!("--hold 必须为非负数");
        }
        let session = connect.open()?;
        let enable = self.switch == Switch::On;
        session.gravity_compensation(enable)?;
        println!("✅ 重力补偿: {}", if enable { "开启" } else { "关闭" });

        let start = Instant::now();
        let hold = Duration::from_secs_f64(self.hold);
        while self.hold == 0.0 || start.elapsed() < hold {
            std::thread::sleep(Duration::from_millis(100));
            if session.is_faulted()? {
                bail!("机械臂进入故障状态: {:?}", session.servo_state()?.fault);
            }
        }

        session.cleanup();
        Ok(())
    }
}
