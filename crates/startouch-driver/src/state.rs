//! 状态结构定义
//!
//! 控制线程每个周期发布一份 [`ArmSnapshot`]（`ArcSwap`，读取无锁）。

use crate::error::TransportError;
use startouch_kinematics::{DOF, JointAngles};
use startouch_protocol::{MotorStatus, NodeId};
use thiserror::Error;

/// 所有关节都已上报时的掩码
pub const ALL_JOINTS_MASK: u8 = (1 << DOF) - 1;

/// 关节状态（测量值）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JointState {
    /// 关节角度（rad）
    pub positions: JointAngles,
    /// 关节速度（rad/s）
    pub velocities: JointAngles,
    /// 关节力矩（N·m）
    pub torques: JointAngles,
    /// 最新反馈帧的时间戳（微秒）
    pub timestamp_us: u64,
    /// 已上报关节掩码（Bit 0-5 对应 Joint 1-6）
    pub valid_mask: u8,
}

impl JointState {
    /// 所有关节是否都已上报过
    pub fn is_complete(&self) -> bool {
        self.valid_mask & ALL_JOINTS_MASK == ALL_JOINTS_MASK
    }

    /// 指定关节是否已上报
    pub fn is_valid(&self, joint: usize) -> bool {
        joint < DOF && self.valid_mask & (1 << joint) != 0
    }
}

/// 夹爪控制模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GripperMode {
    /// 按三次曲线规划到目标
    #[default]
    Planned,
    /// 直接下发目标
    Raw,
}

/// 夹爪状态
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GripperState {
    /// 归一化开度 `[0, 1]`（0 = 闭合，1 = 张开）
    pub position: f64,
    /// 当前目标开度
    pub target: f64,
    pub mode: GripperMode,
    /// 是否正在跟踪规划轨迹
    pub tracking: bool,
    /// 电机状态
    pub status: MotorStatus,
}

/// 伺服状态机
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ServoMode {
    /// 保持当前目标
    #[default]
    Idle,
    /// 跟踪规划轨迹
    Tracking,
    /// 直接设定点保持
    RawHold,
    /// 故障（停止下发，等待显式回零）
    Fault,
}

/// 故障原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaultReason {
    #[error("transport failure: {0}")]
    Transport(TransportError),

    /// 连续多个周期没有收到反馈
    #[error("no telemetry for {ticks} consecutive ticks")]
    TelemetryTimeout { ticks: u32 },

    /// 电机上报故障状态
    #[error("motor {node} reported {status:?}")]
    Motor { node: NodeId, status: MotorStatus },
}

/// 伺服状态（对外发布）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServoStatus {
    pub mode: ServoMode,
    /// 正在跟踪的轨迹 ID
    pub trajectory_id: Option<u64>,
    /// 当前保持 / 跟踪的关节目标
    pub target: JointAngles,
    pub fault: Option<FaultReason>,
    /// 是否叠加重力补偿力矩
    pub gravity_compensation: bool,
}

/// 控制线程发布的完整快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArmSnapshot {
    pub joints: JointState,
    /// 夹爪状态（无夹爪时为 `None`）
    pub gripper: Option<GripperState>,
    pub servo: ServoStatus,
    /// 各节点最近一次上报的电机状态（关节 0-5，夹爪 6）
    pub motor_status: [MotorStatus; DOF + 1],
    /// 控制周期计数
    pub tick: u64,
}

impl ArmSnapshot {
    pub fn is_faulted(&self) -> bool {
        self.servo.mode == ServoMode::Fault
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_state_validity_mask() {
        let mut state = JointState::default();
        assert!(!state.is_complete());
        state.valid_mask = 0b0000_0101;
        assert!(state.is_valid(0));
        assert!(!state.is_valid(1));
        assert!(state.is_valid(2));
        assert!(!state.is_valid(6));
        state.valid_mask = ALL_JOINTS_MASK;
        assert!(state.is_complete());
    }

    #[test]
    fn test_fault_reason_display() {
        let reason = FaultReason::Transport(TransportError::BusOff);
        assert_eq!(format!("{}", reason), "transport failure: CAN bus off");
        let reason = FaultReason::TelemetryTimeout { ticks: 5 };
        assert_eq!(format!("{}", reason), "no telemetry for 5 consecutive ticks");
    }

    #[test]
    fn test_default_snapshot_is_idle() {
        let snapshot = ArmSnapshot::default();
        assert_eq!(snapshot.servo.mode, ServoMode::Idle);
        assert!(!snapshot.is_faulted());
        assert!(snapshot.gripper.is_none());
    }
}
