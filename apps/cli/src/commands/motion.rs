//! 运动命令：关节移动、末端位姿、回零
//!
//! 移动前做关节限位检查，大幅移动需要确认（`--force` 跳过）

use anyhow::{Context, Result, bail};
use clap::Args;
use startouch_sdk::Pose;
use startouch_sdk::client::DEFAULT_MOVE_DURATION;

use crate::connect::{ConnectArgs, wait_motion};
use crate::safety::SafetyChecker;
use crate::validation::{JointValidator, parse_list};

/// 移动命令参数
#[derive(Args, Debug)]
pub struct MoveCommand {
    /// 目标关节位置（弧度），逗号分隔的 6 个值
    /// 例如：0.1,0.2,0.3,0.4,0.5,0.6
    #[arg(short, long)]
    pub joints: String,

    /// 运动时长（s）
    #[arg(short = 't', long, default_value_t = DEFAULT_MOVE_DURATION)]
    pub duration: f64,

    /// 直接下发设定点（不规划）
    #[arg(long)]
    pub raw: bool,

    /// 跳过确认提示
    #[arg(long)]
    pub force: bool,
}

impl MoveCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let arm = connect.resolve()?;
        let target = JointValidator::new(&arm.geometry).parse_joints(&self.joints)?;

        let session = connect.open()?;
        let current = session.get_joint_positions()?;
        if !SafetyChecker::new(self.force).confirm(&current, &target)? {
            println!("❌ 已取消");
            session.cleanup();
            return Ok(());
        }

        println!("⏳ 正在移动到目标位置...");
        for (i, &pos) in target.iter().enumerate() {
            println!("  J{}: {:.3} rad ({:.1}°)", i + 1, pos, pos.to_degrees());
        }

        if self.raw {
            session.set_joint_raw(&target, &[0.0; 6])?;
            wait_motion(&session, 0.0)?;
        } else {
            let trajectory = session.set_joint(&target, self.duration)?;
            wait_motion(&session, trajectory.duration())?;
        }

        session.cleanup();
        println!("✅ 移动完成");
        Ok(())
    }
}

/// 末端位姿命令参数
#[derive(Args, Debug)]
pub struct PoseCommand {
    /// 目标位置 x,y,z（m）
    #[arg(short, long)]
    pub pos: String,

    /// 目标姿态 roll,pitch,yaw（rad）
    #[arg(short, long, conflicts_with = "quat")]
    pub euler: Option<String>,

    /// 目标姿态四元数 w,x,y,z
    #[arg(short, long)]
    pub quat: Option<String>,

    /// 运动时长（s）
    #[arg(short = 't', long, default_value_t = DEFAULT_MOVE_DURATION)]
    pub duration: f64,

    /// 直接下发（逆解后不规划）
    #[arg(long)]
    pub raw: bool,

    /// 跳过确认提示
    #[arg(long)]
    pub force: bool,
}

impl PoseCommand {
    pub fn target(&self) -> Result<Pose> {
        let position = parse_list::<3>(&self.pos).context("解析位置失败")?;
        match (&self.euler, &self.quat) {
            (Some(euler), None) => Ok(Pose::new(
                position,
                parse_list::<3>(euler).context("解析欧拉角失败")?,
            )),
            (None, Some(quat)) => {
                let q = parse_list::<4>(quat).context("解析四元数失败")?;
                Ok(Pose::from_quaternion(position, q)?)
            },
            _ => bail!("需要指定 --euler 或 --quat 之一"),
        }
    }

    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let target = self.target()?;
        let session = connect.open()?;

        let current = session.get_joint_positions()?;
        let goal = session
            .engine()
            .inverse(&target, &current)
            .context("目标位姿不可达")?;
        if !SafetyChecker::new(self.force).confirm(&current, &goal)? {
            println!("❌ 已取消");
            session.cleanup();
            return Ok(());
        }

        println!(
            "⏳ 移动末端到 [{:.3}, {:.3}, {:.3}]...",
            target.position[0], target.position[1], target.position[2]
        );
        if self.raw {
            session.set_end_effector_pose_raw(&target)?;
            wait_motion(&session, 0.0)?;
        } else {
            let trajectory = session.set_end_effector_pose(&target, self.duration)?;
            wait_motion(&session, trajectory.duration())?;
        }

        let reached = session.get_end_effector_pose()?;
        println!(
            "✅ 到达 [{:.4}, {:.4}, {:.4}]（误差 {:.2} mm）",
            reached.position[0],
            reached.position[1],
            reached.position[2],
            reached.position_distance(&target) * 1000.0
        );
        session.cleanup();
        Ok(())
    }
}

/// 回零（故障时先恢复）
pub fn home(connect: &ConnectArgs) -> Result<()> {
    let session = connect.open()?;
    if session.is_faulted()? {
        println!("⚠️  机械臂处于故障状态，尝试恢复...");
    }
    let trajectory = session.go_home()?;
    println!("⏳ 回零中（{:.1}s）...", trajectory.duration());
    wait_motion(&session, trajectory.duration())?;
    session.cleanup();
    println!("✅ 已回到零位");
    Ok(())
}
