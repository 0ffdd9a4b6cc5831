//! # Startouch Kinematics
//!
//! 运动学与动力学计算（纯 Rust，无硬件依赖）
//!
//! ## 模块
//!
//! - `orientation`: 四元数 / 欧拉角转换、球面插值、[`Pose`]
//! - `dh`: 标准 DH 参数与臂型几何 [`ArmGeometry`]
//! - `ik`: 阻尼最小二乘逆解与 [`IkConfig`]
//! - `calibration`: 标定文件加载（置换矩阵、基参数、摩擦参数）
//! - `engine`: [`KinematicsEngine`]，正逆解、雅可比、重力补偿与摩擦前馈
//!
//! ## 约定
//!
//! - 单位：弧度、米、秒
//! - 四元数顺序：`[w, x, y, z]`
//! - 欧拉角：ZYX（`R = Rz(yaw)·Ry(pitch)·Rx(roll)`），返回 `[roll, pitch, yaw]`，与 nalgebra 一致

pub mod calibration;
pub mod dh;
pub mod engine;
pub mod error;
pub mod ik;
pub mod orientation;

pub use calibration::{CalibrationPaths, CalibrationSet, FrictionParams, StandardParameters};
pub use dh::{ArmGeometry, DhLink};
pub use engine::{GravityRegressor, KinematicsEngine};
pub use error::{CalibrationError, KinematicsError};
pub use ik::IkConfig;
pub use orientation::{
    Pose, euler_to_quaternion, normalize_quaternion, quaternion_to_euler, quaternion_wxyz,
    quaternion_xyzw_to_euler, slerp, unit_quaternion, wrap_angle,
};

/// 关节自由度
pub const DOF: usize = 6;

/// 关节角度（rad）
pub type JointAngles = [f64; DOF];

/// 重力加速度（m/s²，世界坐标系 -Z 方向）
pub const GRAVITY: f64 = 9.81;
