//! Startouch SDK - Startouch 6 轴机械臂 Rust SDK
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): MIT 指令 / 反馈帧编码解码、特殊指令、节点寻址
//! - **CAN 层** (`can`): CAN / CAN-FD 抽象，SocketCAN 后端与模拟总线（`mock` feature）
//! - **运动学层** (`kinematics`): 正逆解、雅可比、姿态转换、标定与重力补偿
//! - **驱动层** (`driver`): 控制线程、轨迹规划、伺服与夹爪控制器
//! - **客户端层** (`client`): [`ArmSession`] 会话接口
//!
//! # 快速开始
//!
//! ```no_run
//! use startouch_sdk::prelude::*;
//!
//! startouch_sdk::init_logger();
//! let config = ArmConfig::new("can0", CalibrationPaths::in_dir("/etc/startouch"));
//! let session = ArmSession::new(config)?;
//! session.set_joint(&[0.0, 0.5, 0.5, 0.0, 0.0, 0.0], 2.0)?;
//! session.go_home()?;
//! session.cleanup();
//! # Ok::<(), SessionError>(())
//! ```

pub use startouch_can as can;
pub use startouch_client as client;
pub use startouch_driver as driver;
pub use startouch_kinematics as kinematics;
pub use startouch_protocol as protocol;

pub mod prelude;

// 客户端层（推荐入口）
pub use client::{ArmConfig, ArmSession, ConfigError, HOME_POSE, SessionError};

// 常用类型
pub use can::{CanAdapter, CanError};
pub use driver::{ArmSnapshot, DriverError, JointState, ServoMode, Trajectory};
pub use kinematics::{CalibrationPaths, JointAngles, KinematicsError, Pose};
pub use protocol::ProtocolError;

use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// 安装 `tracing-subscriber`（`RUST_LOG` 过滤，缺省 `info`），并把 `log` crate 的记录桥接到 `tracing`。
/// 已经初始化过时返回 `false`。
pub fn init_logger() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();

    if tracing_log::LogTracer::init().is_err() {
        return false;
    }
    tracing::subscriber::set_global_default(subscriber).is_ok()
}
