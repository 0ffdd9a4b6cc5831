//! 状态查询命令

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use startouch_sdk::ArmSession;

use crate::connect::ConnectArgs;

/// 状态查询参数
#[derive(Args, Debug)]
pub struct StateCommand {
    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

/// 状态报告
#[derive(Debug, Serialize)]
pub struct StateReport {
    pub positions: [f64; 6],
    pub velocities: [f64; 6],
    pub torques: [f64; 6],
    pub end_position: [f64; 3],
    pub end_euler: [f64; 3],
    pub end_quaternion: [f64; 4],
    pub gripper: Option<f64>,
    pub servo_mode: String,
    pub fault: Option<String>,
    pub gravity_compensation: bool,
}

impl StateReport {
    pub fn collect(session: &ArmSession) -> Result<Self> {
        let snapshot = session.snapshot()?;
        let pose = session.get_end_effector_pose()?;
        Ok(Self {
            positions: snapshot.joints.positions,
            velocities: snapshot.joints.velocities,
            torques: snapshot.joints.torques,
            end_position: pose.position,
            end_euler: pose.euler,
            end_quaternion: pose.quaternion(),
            gripper: snapshot.gripper.as_ref().map(|g| g.position),
            servo_mode: format!("{:?}", snapshot.servo.mode),
            fault: snapshot.servo.fault.as_ref().map(ToString::to_string),
            gravity_compensation: snapshot.servo.gravity_compensation,
        })
    }

    pub fn print_table(&self) {
        println!("📊 关节状态:");
        for i in 0..6 {
            println!(
                "  J{}: {:>8.3} rad ({:>7.1}°)  {:>7.3} rad/s  {:>7.3} N·m",
                i + 1,
                self.positions[i],
                self.positions[i].to_degrees(),
                self.velocities[i],
                self.torques[i]
            );
        }
        let [x, y, z] = self.end_position;
        let [roll, pitch, yaw] = self.end_euler;
        println!("📍 末端位姿: [{:.4}, {:.4}, {:.4}] m", x, y, z);
        println!("   欧拉角:   [{:.4}, {:.4}, {:.4}] rad", roll, pitch, yaw);
        if let Some(gripper) = self.gripper {
            println!("✋ 夹爪开度: {:.3}", gripper);
        }
        println!("⚙️  伺服: {}", self.servo_mode);
        if let Some(fault) = &self.fault {
            println!("⚠️  故障: {}", fault);
        }
    }
}

impl StateCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let session = connect.open()?;
        let report = StateReport::collect(&session)?;
        session.cleanup();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            report.print_table();
        }
        Ok(())
    }
}
