//! 会话层错误类型定义

use startouch_driver::{DriverError, FaultReason, PlanError, TransportError};
use startouch_kinematics::{CalibrationError, KinematicsError};
use std::path::PathBuf;
use thiserror::Error;

/// 配置错误（会话创建阶段的致命错误）
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// 会话层错误类型
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 逆解失败（不影响当前运动）
    #[error("Kinematics error: {0}")]
    Kinematics(#[from] KinematicsError),

    #[error("Planning error: {0}")]
    Plan(PlanError),

    /// 时长非正、非有限或短于一个控制周期（未下发任何指令）
    #[error("Invalid duration: {0} s")]
    InvalidDuration(f64),

    /// 目标为 NaN
    #[error("Invalid position: {0}")]
    InvalidPosition(f64),

    /// 伺服处于故障状态，需先 `go_home`
    #[error("Arm is faulted ({0}); call go_home to recover")]
    Faulted(FaultReason),

    #[error("Gripper not present")]
    GripperAbsent,

    /// 会话已关闭
    #[error("Session closed")]
    Closed,

    #[error("Control thread unavailable: {0}")]
    ControlThread(String),

    #[error("Driver error: {0}")]
    Driver(DriverError),
}

impl From<PlanError> for SessionError {
    fn from(error: PlanError) -> Self {
        match error {
            PlanError::InvalidDuration(tf) => SessionError::InvalidDuration(tf),
            PlanError::Kinematics(e) => SessionError::Kinematics(e),
            other => SessionError::Plan(other),
        }
    }
}

impl From<DriverError> for SessionError {
    fn from(error: DriverError) -> Self {
        match error {
            DriverError::Transport(e) => SessionError::Transport(e),
            DriverError::Can(e) => SessionError::Transport(e.into()),
            DriverError::InvalidPosition(p) => SessionError::InvalidPosition(p),
            DriverError::GripperAbsent => SessionError::GripperAbsent,
            DriverError::ControlThreadStopped => {
                SessionError::ControlThread("control thread stopped".to_string())
            },
            DriverError::ControlThread(msg) => SessionError::ControlThread(msg),
            DriverError::InvalidConfig(msg) => SessionError::Config(ConfigError::Invalid(msg)),
            other => SessionError::Driver(other),
        }
    }
}
