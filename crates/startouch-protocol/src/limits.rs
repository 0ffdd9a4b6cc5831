//! 电机量程定义
//!
//! MIT 帧中位置/速度/力矩的编码量程由电机型号决定，
//! 发送端和接收端必须使用相同的量程才能正确还原物理量。

use crate::ids::{JOINT_COUNT, NodeId};

/// Kp 编码量程上限（Nm/rad）
pub const KP_MAX: f64 = 500.0;

/// Kd 编码量程上限（Nm·s/rad）
pub const KD_MAX: f64 = 5.0;

/// 电机量程（编码范围为 `[-max, max]`）
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorLimits {
    /// 位置量程（rad）
    pub p_max: f64,
    /// 速度量程（rad/s）
    pub v_max: f64,
    /// 力矩量程（N·m）
    pub t_max: f64,
}

impl MotorLimits {
    pub const DM4310: MotorLimits = MotorLimits {
        p_max: 12.5,
        v_max: 30.0,
        t_max: 10.0,
    };

    pub const DM4340: MotorLimits = MotorLimits {
        p_max: 12.5,
        v_max: 10.0,
        t_max: 28.0,
    };

    pub const DM8009: MotorLimits = MotorLimits {
        p_max: 12.5,
        v_max: 45.0,
        t_max: 54.0,
    };

    /// 量程是否有效（全部为有限正数）
    pub fn is_valid(&self) -> bool {
        [self.p_max, self.v_max, self.t_max]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}

/// 默认关节电机布局（J1-J2 大扭矩，J3-J4 中型，J5-J6 腕部小电机）
pub const DEFAULT_JOINT_LIMITS: [MotorLimits; JOINT_COUNT] = [
    MotorLimits::DM8009,
    MotorLimits::DM8009,
    MotorLimits::DM4340,
    MotorLimits::DM4340,
    MotorLimits::DM4310,
    MotorLimits::DM4310,
];

/// 默认夹爪电机量程
pub const DEFAULT_GRIPPER_LIMITS: MotorLimits = MotorLimits::DM4310;

/// 按节点查询默认量程
pub fn default_limits(node: NodeId) -> MotorLimits {
    match node {
        NodeId::Joint(index) => DEFAULT_JOINT_LIMITS[index as usize % JOINT_COUNT],
        NodeId::Gripper => DEFAULT_GRIPPER_LIMITS,
    }
}
