//! 驱动层模块
//!
//! 本模块提供 Startouch 机械臂的运动控制核心，包括：
//! - 节点级传输（MIT 指令编码、反馈批量读取）
//! - 关节空间 / 笛卡尔空间轨迹规划（三次时间缩放）
//! - 单控制线程伺服循环（固定频率、邮箱下发、故障锁存）
//! - 夹爪开度映射与规划
//! - 状态发布（ArcSwap 无锁读取）与原子计数指标
//!
//! # 使用场景
//!
//! 适用于需要直接驱动控制线程、自行规划轨迹的场景。
//! 大多数用户应该使用 `startouch-client` 提供的 `ArmSession`。

mod arm;
mod error;
pub mod gripper;
pub mod metrics;
pub mod pipeline;
pub mod servo;
pub mod state;
pub mod trajectory;
pub mod transport;

pub use arm::ArmDriver;
pub use error::{DriverError, PlanError, TransportError};
pub use gripper::{GripperCommand, GripperConfig, GripperTarget};
pub use metrics::{ControlMetrics, MetricsSnapshot};
pub use pipeline::{ControlContext, ControlLoop, PipelineConfig};
pub use servo::{ServoCommand, ServoConfig};
pub use state::*;
pub use trajectory::{
    DEFAULT_MAX_JOINT_STEP, MAX_TRAJECTORY_SAMPLES, Trajectory, TrajectoryPlanner, TrajectorySample,
    plan_joint,
};
pub use transport::{NODE_COUNT, Telemetry, Transport, TransportConfig};
