//! 机械臂总线接口状态查询
//!
//! 打开 socket 之前读取接口的 UP 标志与 MTU，确认它能承载会话所需的帧格式：
//! 经典模式只要求接口已启动，FD 模式还要求 MTU 为 [`CANFD_MTU`]
//! （`ip link set <iface> type can ... fd on` 之后内核自动设置）。
//!
//! 只读 ioctl，普通用户即可执行。

use crate::{CanDeviceError, CanDeviceErrorKind, CanError};
use libc::{AF_INET, IFF_UP, SIOCGIFFLAGS, SIOCGIFMTU, SOCK_DGRAM, if_nametoindex, ifreq};
use std::ffi::CString;
use std::io;
use tracing::debug;

/// IFNAMSIZ - 1
const MAX_IFACE_NAME_LEN: usize = 15;

/// `sizeof(struct can_frame)`
pub const CAN_MTU: u32 = 16;

/// `sizeof(struct canfd_frame)`
pub const CANFD_MTU: u32 = 72;

/// 接口状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceStatus {
    pub index: u32,
    pub is_up: bool,
    pub mtu: u32,
}

impl InterfaceStatus {
    /// 接口是否能收发 CAN-FD 帧
    pub fn supports_fd(&self) -> bool {
        self.mtu >= CANFD_MTU
    }

    /// 按会话的总线模式检查接口
    ///
    /// # 错误
    /// - `CanDeviceErrorKind::NotUp`: 接口未启动
    /// - `CanDeviceErrorKind::UnsupportedConfig`: 请求 FD 模式但接口 MTU 不足
    pub fn require(&self, interface: &str, fd: bool) -> Result<(), CanError> {
        if !self.is_up {
            return Err(CanDeviceError::new(
                CanDeviceErrorKind::NotUp,
                format!(
                    "Arm bus '{}' is down, bring it up with:\n  sudo ip link set {} up type can bitrate 1000000{}",
                    interface,
                    interface,
                    if fd { " dbitrate 5000000 fd on" } else { "" }
                ),
            )
            .into());
        }
        if fd && !self.supports_fd() {
            return Err(CanDeviceError::new(
                CanDeviceErrorKind::UnsupportedConfig,
                format!(
                    "enable_fd is set but '{}' has MTU {} (CAN-FD needs {}); reconfigure it with 'fd on'",
                    interface, self.mtu, CANFD_MTU
                ),
            )
            .into());
        }
        Ok(())
    }
}

/// 读取接口索引、UP 标志与 MTU
///
/// # 错误
/// - `CanError::Device`（`NotFound`）: 接口名无效或接口不存在
/// - `CanError::Io`: socket / ioctl 失败
pub fn interface_status(interface: &str) -> Result<InterfaceStatus, CanError> {
    if interface.is_empty() || interface.len() > MAX_IFACE_NAME_LEN {
        return Err(CanDeviceError::new(
            CanDeviceErrorKind::NotFound,
            format!(
                "Arm bus name '{}' must be 1-{} characters",
                interface, MAX_IFACE_NAME_LEN
            ),
        )
        .into());
    }
    let c_iface = CString::new(interface).map_err(|e| {
        CanDeviceError::new(
            CanDeviceErrorKind::NotFound,
            format!("Invalid arm bus name: {}", e),
        )
    })?;

    let index = unsafe { if_nametoindex(c_iface.as_ptr()) };
    if index == 0 {
        return Err(CanDeviceError::new(
            CanDeviceErrorKind::NotFound,
            format!(
                "Arm bus '{}' does not exist ({}); check can_interface in the arm config",
                interface,
                io::Error::last_os_error()
            ),
        )
        .into());
    }

    let socket = ControlSocket::open()?;
    let flags = unsafe { socket.query(interface, SIOCGIFFLAGS)?.ifr_ifru.ifru_flags };
    let mtu = unsafe { socket.query(interface, SIOCGIFMTU)?.ifr_ifru.ifru_mtu };

    let status = InterfaceStatus {
        index,
        is_up: (flags as i32 & IFF_UP) != 0,
        mtu: mtu.max(0) as u32,
    };
    debug!("Arm bus '{}': {:?}", interface, status);
    Ok(status)
}

/// 仅用于 ioctl 查询的 UDP socket，Drop 时关闭
struct ControlSocket(libc::c_int);

impl ControlSocket {
    fn open() -> Result<Self, CanError> {
        let fd = unsafe { libc::socket(AF_INET, SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(CanError::Io(io::Error::last_os_error()));
        }
        Ok(Self(fd))
    }

    /// `interface` 长度已由调用方校验（不超过 IFNAMSIZ - 1）
    fn query(&self, interface: &str, request: libc::Ioctl) -> Result<ifreq, CanError> {
        let mut ifr: ifreq = unsafe { std::mem::zeroed() };
        for (dst, src) in ifr.ifr_name.iter_mut().zip(interface.bytes()) {
            *dst = src as libc::c_char;
        }
        let result = unsafe { libc::ioctl(self.0, request, &mut ifr as *mut ifreq) };
        if result < 0 {
            return Err(CanError::Io(io::Error::last_os_error()));
        }
        Ok(ifr)
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(is_up: bool, mtu: u32) -> InterfaceStatus {
        InterfaceStatus { index: 3, is_up, mtu }
    }

    #[test]
    fn test_down_bus_rejected() {
        let err = status(false, CAN_MTU).require("can0", false).unwrap_err();
        match err {
            CanError::Device(e) => {
                assert_eq!(e.kind, CanDeviceErrorKind::NotUp);
                assert!(e.message.contains("sudo ip link set can0 up"));
                assert!(!e.message.contains("fd on"));
            },
            other => panic!("Expected Device error, got {:?}", other),
        }
        let err = status(false, CANFD_MTU).require("can0", true).unwrap_err();
        assert!(matches!(err, CanError::Device(ref e) if e.message.contains("fd on")));
    }

    #[test]
    fn test_fd_requires_fd_mtu() {
        assert!(status(true, CAN_MTU).require("can0", false).is_ok());
        assert!(status(true, CANFD_MTU).require("can0", false).is_ok());
        assert!(status(true, CANFD_MTU).require("can0", true).is_ok());

        let err = status(true, CAN_MTU).require("can1", true).unwrap_err();
        assert!(matches!(
            err,
            CanError::Device(ref e)
                if e.kind == CanDeviceErrorKind::UnsupportedConfig && e.message.contains("MTU 16")
        ));
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "this_name_is_way_too_long"] {
            let err = interface_status(name).unwrap_err();
            assert!(matches!(err, CanError::Device(ref e) if e.kind == CanDeviceErrorKind::NotFound));
        }
    }

    #[test]
    fn test_missing_interface() {
        let err = interface_status("nocan42").unwrap_err();
        match err {
            CanError::Device(e) => {
                assert_eq!(e.kind, CanDeviceErrorKind::NotFound);
                assert!(e.message.contains("does not exist"));
            },
            other => panic!("Expected Device error, got {:?}", other),
        }
    }

    #[test]
    fn test_loopback_status() {
        // lo 总是存在且已启动
        let status = interface_status("lo").unwrap();
        assert!(status.is_up);
        assert!(status.index > 0);
        assert!(status.mtu > 0);
    }
}
