//! SocketCAN CAN 适配器实现
//!
//! 基于 Linux SocketCAN 子系统，支持经典 CAN 与 CAN-FD 两种模式。
//!
//! ## 特性
//!
//! - 打开前检查接口是否存在、处于 UP 状态，FD 模式下 MTU 是否足够
//! - 经典模式使用 `CanSocket`，FD 模式使用 `CanFdSocket`（可同时收发经典帧）
//! - 错误帧：Bus Off / 缓冲区溢出上报为错误，其他错误帧记录后跳过
//! - 软件时间戳（接收时刻，Unix 纪元微秒）
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - **接口配置**：波特率、FD 数据段速率由 `ip link` 配置，不在应用层设置

use crate::{ArmFrame, CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError};
use socketcan::{
    CanAnyFrame, CanError as SocketCanError, CanErrorFrame, CanFdFrame, CanFdSocket, CanFrame,
    CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId,
};
use std::io;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, trace, warn};

mod interface;

pub use interface::{CAN_MTU, CANFD_MTU, InterfaceStatus, interface_status};

/// 默认读超时（与控制线程的遥测轮询窗口一致）
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// 底层 socket（经典或 FD）
#[derive(Debug)]
enum SocketKind {
    Classic(CanSocket),
    Fd(CanFdSocket),
}

/// SocketCAN 适配器
///
/// # 示例
///
/// ```no_run
/// use startouch_can::{ArmFrame, CanAdapter, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::open("can0", false).unwrap();
/// adapter.send(ArmFrame::new_standard(0x01, &[0xFF; 8])).unwrap();
/// let frame = adapter.receive().unwrap();
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    socket: SocketKind,
    /// 接口名称（如 "can0"）
    interface: String,
    /// 读超时时间（用于 receive 方法）
    read_timeout: Duration,
}

impl SocketCanAdapter {
    /// 打开 SocketCAN 接口
    ///
    /// # 参数
    /// - `interface`: CAN 接口名称（如 "can0" 或 "vcan0"）
    /// - `fd`: 是否以 CAN-FD 模式打开
    ///
    /// # 错误
    /// - `CanError::Device`: 接口不存在、未启动、FD 模式下 MTU 不足或无法打开
    /// - `CanError::Io`: 系统调用失败
    pub fn open(interface: impl Into<String>, fd: bool) -> Result<Self, CanError> {
        let interface = interface.into();
        interface_status(&interface)?.require(&interface, fd)?;

        let open_err = |e: io::Error| {
            let kind = if e.kind() == io::ErrorKind::PermissionDenied {
                CanDeviceErrorKind::AccessDenied
            } else if fd {
                CanDeviceErrorKind::UnsupportedConfig
            } else {
                CanDeviceErrorKind::Backend
            };
            CanDeviceError::new(
                kind,
                format!("Failed to open CAN interface '{}': {}", interface, e),
            )
        };

        let socket = if fd {
            SocketKind::Fd(CanFdSocket::open(&interface).map_err(open_err)?)
        } else {
            SocketKind::Classic(CanSocket::open(&interface).map_err(open_err)?)
        };

        let mut adapter = Self {
            socket,
            interface,
            read_timeout: DEFAULT_READ_TIMEOUT,
        };
        adapter.set_read_timeout(DEFAULT_READ_TIMEOUT)?;

        trace!(
            "SocketCAN interface '{}' opened ({})",
            adapter.interface,
            if fd { "CAN-FD" } else { "classic" }
        );
        Ok(adapter)
    }

    /// 获取接口名称
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// 获取读超时时间
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// 设置读超时（必须非零）
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), CanError> {
        self.apply_socket_timeout(timeout)?;
        self.read_timeout = timeout;
        Ok(())
    }

    fn apply_socket_timeout(&self, timeout: Duration) -> Result<(), CanError> {
        match &self.socket {
            SocketKind::Classic(s) => s.set_read_timeout(timeout),
            SocketKind::Fd(s) => s.set_read_timeout(timeout),
        }
        .map_err(CanError::Io)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> Result<(), CanError> {
        match &self.socket {
            SocketKind::Classic(s) => s.set_nonblocking(nonblocking),
            SocketKind::Fd(s) => s.set_nonblocking(nonblocking),
        }
        .map_err(CanError::Io)
    }

    /// 读取一帧，错误帧转换为错误或跳过
    fn read_one(&self) -> Result<Option<ArmFrame>, CanError> {
        let frame = match &self.socket {
            SocketKind::Classic(s) => match s.read_frame().map_err(map_io_error)? {
                CanFrame::Data(data) => {
                    let id = data.raw_id();
                    Some(to_arm_frame(id, data.data(), data.is_extended(), false))
                },
                CanFrame::Remote(_) => {
                    trace!("Ignoring remote frame on '{}'", self.interface);
                    None
                },
                CanFrame::Error(err) => return map_error_frame(err).map(|_| None),
            },
            SocketKind::Fd(s) => match s.read_frame().map_err(map_io_error)? {
                CanAnyFrame::Normal(data) => {
                    let id = data.raw_id();
                    Some(to_arm_frame(id, data.data(), data.is_extended(), false))
                },
                CanAnyFrame::Fd(fd_frame) => {
                    let id = fd_frame.raw_id();
                    Some(to_arm_frame(
                        id,
                        fd_frame.data(),
                        fd_frame.is_extended(),
                        true,
                    ))
                },
                CanAnyFrame::Remote(_) => {
                    trace!("Ignoring remote frame on '{}'", self.interface);
                    None
                },
                CanAnyFrame::Error(err) => return map_error_frame(err).map(|_| None),
            },
        };
        Ok(frame)
    }
}

/// 单次接收的截止时间：跳过的错误帧 / 远程帧不重置等待
#[derive(Debug, Clone, Copy)]
struct Deadline(Instant);

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// 剩余等待时间，已到期返回 `None`
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.0.checked_duration_since(now).filter(|d| !d.is_zero())
    }
}

fn to_arm_frame(id: u32, data: &[u8], is_extended: bool, is_fd: bool) -> ArmFrame {
    let frame = match (is_extended, is_fd) {
        (true, _) => {
            let mut frame = ArmFrame::new_extended(id, data);
            if is_fd {
                // FD 扩展帧：手动补齐长度
                frame.is_fd = true;
                let len = data.len().min(frame.data.len());
                frame.data[..len].copy_from_slice(&data[..len]);
                frame.len = len as u8;
            }
            frame
        },
        (false, true) => ArmFrame::new_fd(id as u16, data),
        (false, false) => ArmFrame::new_standard(id as u16, data),
    };
    frame.with_timestamp(now_micros())
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn map_io_error(e: io::Error) -> CanError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => CanError::Timeout,
        _ => CanError::Io(e),
    }
}

/// 错误帧处理：Bus Off / 溢出返回错误，其余记录后跳过（`Ok(())`）
fn map_error_frame(frame: CanErrorFrame) -> Result<(), CanError> {
    let socketcan_error = SocketCanError::from(frame);
    match &socketcan_error {
        SocketCanError::BusOff => {
            error!("CAN Bus Off error detected");
            Err(CanError::BusOff)
        },
        SocketCanError::ControllerProblem(problem) => {
            let problem_str = format!("{}", problem);
            if problem_str.to_lowercase().contains("overflow") {
                error!("CAN Buffer Overflow detected: {}", problem);
                Err(CanError::BufferOverflow)
            } else {
                warn!("CAN Controller Problem: {}, ignoring", problem);
                Ok(())
            }
        },
        _ => {
            warn!("CAN Error Frame received: {}, ignoring", socketcan_error);
            Ok(())
        },
    }
}

impl Drop for SocketCanAdapter {
    fn drop(&mut self) {
        trace!("[Auto-Drop] SocketCAN interface '{}' closed", self.interface);
    }
}

impl CanAdapter for SocketCanAdapter {
    /// 发送帧
    ///
    /// 经典模式下 FD 帧会被拒绝；FD 模式下经典帧按经典格式发送。
    fn send(&mut self, frame: ArmFrame) -> Result<(), CanError> {
        let invalid_id = || {
            CanDeviceError::new(
                CanDeviceErrorKind::InvalidFrame,
                format!("Invalid CAN ID 0x{:X}", frame.id),
            )
        };
        let invalid_frame = || {
            CanDeviceError::new(
                CanDeviceErrorKind::InvalidFrame,
                format!(
                    "Failed to create frame with ID 0x{:X}, len {}",
                    frame.id, frame.len
                ),
            )
        };

        let data = frame.data_slice();
        let result = match (&self.socket, frame.is_fd) {
            (SocketKind::Classic(_), true) => {
                return Err(CanDeviceError::new(
                    CanDeviceErrorKind::UnsupportedConfig,
                    format!(
                        "CAN-FD frame on classic interface '{}'",
                        self.interface
                    ),
                )
                .into());
            },
            (SocketKind::Classic(s), false) => {
                let can_frame = build_classic(&frame, data).ok_or_else(invalid_frame)?;
                s.write_frame(&can_frame)
            },
            (SocketKind::Fd(s), false) => {
                let can_frame = build_classic(&frame, data).ok_or_else(invalid_frame)?;
                s.write_frame(&can_frame)
            },
            (SocketKind::Fd(s), true) => {
                let fd_frame = if frame.is_extended {
                    ExtendedId::new(frame.id)
                        .ok_or_else(invalid_id)
                        .map(|id| CanFdFrame::new(id, data))?
                } else {
                    StandardId::new(frame.id as u16)
                        .ok_or_else(invalid_id)
                        .map(|id| CanFdFrame::new(id, data))?
                }
                .ok_or_else(invalid_frame)?;
                s.write_frame(&fd_frame)
            },
        };
        result.map_err(map_io_error)?;

        trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }

    /// 接收帧（阻塞直到收到有效数据帧或读超时到期）
    ///
    /// 被跳过的帧只消耗剩余时间，总等待不超过读超时。
    fn receive(&mut self) -> Result<ArmFrame, CanError> {
        let deadline = Deadline::after(self.read_timeout);
        let mut shortened = false;
        let result = loop {
            match self.read_one() {
                Ok(Some(frame)) => break Ok(frame),
                Ok(None) => {},
                Err(e) => break Err(e),
            }
            let Some(remaining) = deadline.remaining(Instant::now()) else {
                break Err(CanError::Timeout);
            };
            if let Err(e) = self.apply_socket_timeout(remaining) {
                break Err(e);
            }
            shortened = true;
        };
        if shortened {
            let _ = self.apply_socket_timeout(self.read_timeout);
        }

        let frame = result?;
        trace!(
            "Received CAN frame: ID=0x{:X}, len={}, timestamp_us={}",
            frame.id, frame.len, frame.timestamp_us
        );
        Ok(frame)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        if timeout.is_zero() {
            warn!("Zero receive timeout ignored, use try_receive instead");
            return;
        }
        if let Err(e) = self.set_read_timeout(timeout) {
            warn!("Failed to set receive timeout: {}", e);
        }
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<ArmFrame, CanError> {
        if timeout.is_zero() {
            return self.try_receive()?.ok_or(CanError::Timeout);
        }
        let old_timeout = self.read_timeout;
        self.set_read_timeout(timeout)?;
        let result = self.receive();
        let _ = self.set_read_timeout(old_timeout);
        result
    }

    /// 非阻塞接收
    ///
    /// 零超时的 `SO_RCVTIMEO` 表示无限阻塞，这里改用 `O_NONBLOCK`。
    fn try_receive(&mut self) -> Result<Option<ArmFrame>, CanError> {
        self.set_nonblocking(true)?;
        let result = loop {
            match self.read_one() {
                Ok(Some(frame)) => break Ok(Some(frame)),
                Ok(None) => continue,
                Err(CanError::Timeout) => break Ok(None),
                Err(e) => break Err(e),
            }
        };
        self.set_nonblocking(false)?;
        result
    }

    fn is_fd(&self) -> bool {
        matches!(self.socket, SocketKind::Fd(_))
    }
}

fn build_classic(frame: &ArmFrame, data: &[u8]) -> Option<CanFrame> {
    if frame.is_extended {
        ExtendedId::new(frame.id).and_then(|id| CanFrame::new(id, data))
    } else {
        StandardId::new(frame.id as u16).and_then(|id| CanFrame::new(id, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err = map_io_error(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(matches!(err, CanError::Timeout));
        let err = map_io_error(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(err, CanError::Timeout));
        let err = map_io_error(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(err, CanError::Io(_)));
    }

    #[test]
    fn test_to_arm_frame_classic_and_fd() {
        let frame = to_arm_frame(0x11, &[1, 2, 3, 4, 5, 6, 7, 8], false, false);
        assert_eq!(frame.id, 0x11);
        assert_eq!(frame.len, 8);
        assert!(!frame.is_fd);
        assert!(frame.timestamp_us > 0);

        let frame = to_arm_frame(0x12, &[0xAA; 12], false, true);
        assert!(frame.is_fd);
        assert_eq!(frame.len, 12);

        let frame = to_arm_frame(0x1234_5678 & 0x1FFF_FFFF, &[0x55; 16], true, true);
        assert!(frame.is_extended);
        assert!(frame.is_fd);
        assert_eq!(frame.len, 16);
    }

    #[test]
    fn test_deadline_budget_shrinks() {
        let start = Instant::now();
        let deadline = Deadline(start + Duration::from_millis(10));
        assert_eq!(deadline.remaining(start), Some(Duration::from_millis(10)));
        assert_eq!(
            deadline.remaining(start + Duration::from_millis(7)),
            Some(Duration::from_millis(3))
        );
        assert_eq!(deadline.remaining(start + Duration::from_millis(10)), None);
        assert_eq!(deadline.remaining(start + Duration::from_millis(25)), None);

        // 连续跳过多帧：每次只等待剩余时间，总和不超过超时
        let mut now = start;
        let mut waited = Duration::ZERO;
        while let Some(remaining) = deadline.remaining(now) {
            let step = remaining.min(Duration::from_millis(4));
            waited += step;
            now += step;
        }
        assert_eq!(waited, Duration::from_millis(10));
    }

    #[test]
    fn test_open_missing_interface() {
        let err = SocketCanAdapter::open("nocan42", false).unwrap_err();
        assert!(matches!(err, CanError::Device(ref e) if e.kind == CanDeviceErrorKind::NotFound));
    }

    #[test]
    #[ignore] // 需要 vcan0: sudo ip link add dev vcan0 type vcan && sudo ip link set up vcan0
    fn test_vcan_loopback_roundtrip() {
        let mut tx = SocketCanAdapter::open("vcan0", false).unwrap();
        let mut rx = SocketCanAdapter::open("vcan0", false).unwrap();
        rx.set_read_timeout(Duration::from_millis(100)).unwrap();

        tx.send(ArmFrame::new_standard(0x11, &[1, 2, 3, 4, 5, 6, 7, 8]))
            .unwrap();
        let frame = rx.receive().unwrap();
        assert_eq!(frame.id, 0x11);
        assert_eq!(frame.data_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    #[ignore] // 需要 vcan0
    fn test_vcan_try_receive_empty() {
        let mut rx = SocketCanAdapter::open("vcan0", false).unwrap();
        while rx.try_receive().unwrap().is_some() {}
        assert!(rx.try_receive().unwrap().is_none());
        assert!(matches!(
            rx.receive_timeout(Duration::from_millis(5)),
            Err(CanError::Timeout)
        ));
    }

    #[test]
    #[ignore] // 需要 vcan0
    fn test_classic_socket_rejects_fd_frame() {
        let mut adapter = SocketCanAdapter::open("vcan0", false).unwrap();
        assert!(!adapter.is_fd());
        let err = adapter
            .send(ArmFrame::new_fd(0x01, &[0u8; 8]))
            .unwrap_err();
        assert!(matches!(err, CanError::Device(ref e) if e.kind == CanDeviceErrorKind::UnsupportedConfig));
    }
}
