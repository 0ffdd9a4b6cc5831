//! # Startouch CAN Adapter Layer
//!
//! CAN 硬件抽象层，提供统一的 CAN / CAN-FD 接口抽象。
//!
//! - Linux：[`SocketCanAdapter`]（经典帧或 FD 帧）
//! - `mock` feature：[`SimulatedBus`]，模拟 7 个电机节点的应答行为，用于无硬件测试

use std::time::Duration;
use thiserror::Error;

// 重新导出 startouch-protocol 中的 ArmFrame
pub use startouch_protocol::ArmFrame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanAdapter;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{SimFault, SimHandle, SimulatedBus};

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Buffer overflow")]
    BufferOverflow,
    #[error("Bus off")]
    BusOff,
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Device not started")]
    NotStarted,
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    NotFound,
    NotUp,
    AccessDenied,
    UnsupportedConfig,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 不可恢复的设备错误（接口不存在、未启动、无权限）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CanDeviceErrorKind::NotFound | CanDeviceErrorKind::NotUp | CanDeviceErrorKind::AccessDenied
        )
    }
}

impl From<String> for CanDeviceError {
    fn from(message: String) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for CanDeviceError {
    fn from(message: &str) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

/// CAN 适配器
///
/// `receive` 在适配器当前的读超时内阻塞，超时返回 `CanError::Timeout`。
pub trait CanAdapter {
    fn send(&mut self, frame: ArmFrame) -> Result<(), CanError>;
    fn receive(&mut self) -> Result<ArmFrame, CanError>;
    fn set_receive_timeout(&mut self, _timeout: Duration) {}
    fn receive_timeout(&mut self, timeout: Duration) -> Result<ArmFrame, CanError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }
    fn try_receive(&mut self) -> Result<Option<ArmFrame>, CanError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(CanError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
    /// 是否以 CAN-FD 模式打开
    fn is_fd(&self) -> bool {
        false
    }
}

impl<T: CanAdapter + ?Sized> CanAdapter for Box<T> {
    fn send(&mut self, frame: ArmFrame) -> Result<(), CanError> {
        (**self).send(frame)
    }
    fn receive(&mut self) -> Result<ArmFrame, CanError> {
        (**self).receive()
    }
    fn set_receive_timeout(&mut self, timeout: Duration) {
        (**self).set_receive_timeout(timeout)
    }
    fn receive_timeout(&mut self, timeout: Duration) -> Result<ArmFrame, CanError> {
        (**self).receive_timeout(timeout)
    }
    fn try_receive(&mut self) -> Result<Option<ArmFrame>, CanError> {
        (**self).try_receive()
    }
    fn is_fd(&self) -> bool {
        (**self).is_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// 只实现必需方法的适配器，验证默认实现
    struct QueueAdapter {
        rx: VecDeque<ArmFrame>,
        sent: Vec<ArmFrame>,
    }

    impl CanAdapter for QueueAdapter {
        fn send(&mut self, frame: ArmFrame) -> Result<(), CanError> {
            self.sent.push(frame);
            Ok(())
        }

        fn receive(&mut self) -> Result<ArmFrame, CanError> {
            self.rx.pop_front().ok_or(CanError::Timeout)
        }
    }

    #[test]
    fn test_try_receive_maps_timeout_to_none() {
        let mut adapter = QueueAdapter {
            rx: VecDeque::from([ArmFrame::new_standard(0x11, &[1])]),
            sent: Vec::new(),
        };
        assert!(adapter.try_receive().unwrap().is_some());
        assert!(adapter.try_receive().unwrap().is_none());
    }

    #[test]
    fn test_boxed_adapter_forwards() {
        let mut adapter: Box<dyn CanAdapter + Send> = Box::new(QueueAdapter {
            rx: VecDeque::new(),
            sent: Vec::new(),
        });
        adapter.send(ArmFrame::new_standard(0x01, &[0; 8])).unwrap();
        assert!(matches!(adapter.receive(), Err(CanError::Timeout)));
        assert!(!adapter.is_fd());
    }

    #[test]
    fn test_device_error_fatality() {
        assert!(CanDeviceError::new(CanDeviceErrorKind::NotUp, "can0 down").is_fatal());
        assert!(!CanDeviceError::new(CanDeviceErrorKind::InvalidFrame, "bad id").is_fatal());
        let err: CanDeviceError = "boom".into();
        assert_eq!(err.kind, CanDeviceErrorKind::Unknown);
    }

    #[test]
    fn test_can_error_display() {
        assert_eq!(format!("{}", CanError::Timeout), "Read timeout");
        assert_eq!(format!("{}", CanError::BusOff), "Bus off");
        assert!(format!("{}", CanError::Malformed("dlc 3".into())).contains("dlc 3"));
    }
}
