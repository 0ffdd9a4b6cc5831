//! 驱动层错误类型定义

use startouch_can::CanError;
use startouch_kinematics::KinematicsError;
use startouch_protocol::{NodeId, ProtocolError};
use thiserror::Error;

/// 传输层错误
///
/// 四类错误互不重叠：`Timeout` 属于瞬态错误，可由调用方有限次重试；
/// 其余错误立即上报，控制线程据此进入故障状态。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// 在超时时间内未收到任何帧 / 发送超时
    #[error("Transport timeout")]
    Timeout,

    /// 总线关闭
    #[error("CAN bus off")]
    BusOff,

    /// 已知反馈 ID 的帧长度错误或节点号不一致
    #[error("Malformed frame 0x{id:X}: {reason}")]
    MalformedFrame { id: u32, reason: String },

    /// 设备错误（接口消失、权限、IO 等）
    #[error("Device error: {0}")]
    Device(String),
}

impl TransportError {
    /// 是否为可重试的瞬态错误
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

impl From<CanError> for TransportError {
    fn from(error: CanError) -> Self {
        match error {
            CanError::Timeout => TransportError::Timeout,
            CanError::BusOff => TransportError::BusOff,
            CanError::Malformed(reason) => TransportError::MalformedFrame { id: 0, reason },
            other => TransportError::Device(other.to_string()),
        }
    }
}

/// 轨迹规划错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    /// 时长非正、非有限，或短于一个控制周期
    #[error("Invalid duration: {0} s")]
    InvalidDuration(f64),

    /// 采样频率非正或非有限
    #[error("Invalid control frequency: {0} Hz")]
    InvalidFrequency(f64),

    /// 关节目标含 NaN / 无穷大
    #[error("Non-finite joint target")]
    NonFiniteTarget,

    #[error("Kinematics error: {0}")]
    Kinematics(#[from] KinematicsError),

    /// 相邻采样点之间关节跳变过大（笛卡尔路径穿过奇异区或换解）
    #[error("Joint {joint} jumps {step:.3} rad at sample {sample}")]
    Discontinuous {
        sample: usize,
        joint: usize,
        step: f64,
    },
}

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// CAN 驱动错误
    #[error("CAN driver error: {0}")]
    Can(#[from] CanError),

    /// 协议编码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 启动/恢复时部分节点在限定时间内没有反馈
    #[error("No feedback from nodes: {0:?}")]
    NoFeedback(Vec<NodeId>),

    /// 电机报告故障状态
    #[error("Motor fault on {node}: {status}")]
    MotorFault { node: NodeId, status: String },

    /// 控制线程已退出
    #[error("Control thread stopped")]
    ControlThreadStopped,

    /// 控制线程在限定时间内未响应请求
    #[error("Operation timeout")]
    Timeout,

    /// 夹爪目标为 NaN
    #[error("Invalid gripper position: {0}")]
    InvalidPosition(f64),

    /// 未配置夹爪
    #[error("Gripper not present")]
    GripperAbsent,

    /// 无效配置
    #[error("Invalid driver configuration: {0}")]
    InvalidConfig(String),

    /// 控制线程启动失败
    #[error("Control thread error: {0}")]
    ControlThread(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(format!("{}", TransportError::Timeout), "Transport timeout");
        assert_eq!(format!("{}", TransportError::BusOff), "CAN bus off");
        let err = TransportError::MalformedFrame {
            id: 0x13,
            reason: "length 3".to_string(),
        };
        assert_eq!(format!("{}", err), "Malformed frame 0x13: length 3");
    }

    #[test]
    fn test_only_timeout_is_transient() {
        assert!(TransportError::Timeout.is_transient());
        assert!(!TransportError::BusOff.is_transient());
        assert!(!TransportError::Device("gone".into()).is_transient());
        assert!(
            !TransportError::MalformedFrame {
                id: 0,
                reason: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_from_can_error() {
        assert_eq!(TransportError::from(CanError::Timeout), TransportError::Timeout);
        assert_eq!(TransportError::from(CanError::BusOff), TransportError::BusOff);
        assert!(matches!(
            TransportError::from(CanError::BufferOverflow),
            TransportError::Device(_)
        ));
        assert!(matches!(
            TransportError::from(CanError::Malformed("x".into())),
            TransportError::MalformedFrame { .. }
        ));
    }

    #[test]
    fn test_plan_error_display() {
        assert_eq!(
            format!("{}", PlanError::InvalidDuration(-1.0)),
            "Invalid duration: -1 s"
        );
        let err = PlanError::Discontinuous {
            sample: 4,
            joint: 2,
            step: 1.5,
        };
        assert_eq!(format!("{}", err), "Joint 2 jumps 1.500 rad at sample 4");
    }

    #[test]
    fn test_driver_error_from_transport() {
        let err: DriverError = TransportError::BusOff.into();
        assert!(matches!(err, DriverError::Transport(TransportError::BusOff)));
        assert_eq!(format!("{}", err), "Transport error: CAN bus off");
    }
}
