//! 客户端接口模块
//!
//! 本模块提供 Startouch 机械臂的会话接口，包括：
//! - 配置加载与校验（TOML）
//! - 关节空间 / 笛卡尔空间规划运动与直接设定点
//! - 夹爪开合与开度读取
//! - 重力补偿开关、回零（故障恢复）与清理
//!
//! # 使用场景
//!
//! 这是大多数用户应该使用的模块。
//! 如果需要直接驱动控制线程或自行规划轨迹，可以使用 `startouch-driver`。

pub mod config;
mod error;
mod session;

pub use config::{
    ArmConfig, DEFAULT_CTRL_HZ, DEFAULT_HOME_DURATION, DEFAULT_MOVE_DURATION, HOME_POSE,
};
pub use error::{ConfigError, SessionError};
pub use session::ArmSession;
