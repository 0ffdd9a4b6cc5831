//! # Startouch Protocol
//!
//! 机械臂关节电机 / 夹爪电机的 CAN 总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 节点地址与 CAN ID 映射
//! - `limits`: 电机量程（位置/速度/力矩）
//! - `control`: 控制帧构建（MIT 阻抗帧、使能/失能等特殊指令）
//! - `feedback`: 反馈帧解析
//!
//! ## 位打包
//!
//! MIT 帧内的浮点量按量程线性映射为 12/16 位无符号整数，
//! 多字节字段高位在前（大端）。

pub mod control;
pub mod feedback;
pub mod ids;
pub mod limits;

pub use control::*;
pub use feedback::*;
pub use ids::*;
pub use limits::*;

use thiserror::Error;

/// 经典 CAN 帧最大数据长度
pub const CAN_MAX_DLEN: usize = 8;

/// CAN-FD 帧最大数据长度
pub const CANFD_MAX_DLEN: usize = 64;

/// CAN / CAN-FD 帧的统一抽象
///
/// 协议层和硬件层之间的中间类型：协议层只构建/解析 `ArmFrame`，
/// 由 CAN 层负责转换为具体后端（SocketCAN、模拟总线）的帧类型。
///
/// - **Copy**：高频控制场景（400Hz × 7 节点）下无堆分配
/// - **固定 64 字节缓冲**：同时容纳经典帧与 FD 帧，`len` 表示有效长度
///
/// ```rust
/// use startouch_protocol::ArmFrame;
///
/// let frame = ArmFrame::new_standard(0x01, &[1, 2, 3, 4]);
/// assert_eq!(frame.id(), 0x01);
/// assert_eq!(frame.data_slice(), &[1, 2, 3, 4]);
/// assert!(!frame.is_fd);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmFrame {
    /// CAN ID（标准帧或扩展帧）
    pub id: u32,

    /// 帧数据（未使用部分为 0）
    pub data: [u8; CANFD_MAX_DLEN],

    /// 有效数据长度（经典帧 0-8，FD 帧 0-64）
    pub len: u8,

    /// 是否为扩展帧（29-bit ID）
    pub is_extended: bool,

    /// 是否为 CAN-FD 帧
    pub is_fd: bool,

    /// 硬件/软件时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl ArmFrame {
    /// 创建经典标准帧（数据超过 8 字节时截断）
    pub fn new_standard(id: u16, data: &[u8]) -> Self {
        Self::new(id as u32, data, false, false)
    }

    /// 创建经典扩展帧
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        Self::new(id, data, true, false)
    }

    /// 创建 CAN-FD 标准帧
    ///
    /// 有效长度会向上补齐到合法的 FD DLC 长度（12/16/20/24/32/48/64），补齐部分为 0。
    pub fn new_fd(id: u16, data: &[u8]) -> Self {
        let mut frame = Self::new(id as u32, data, false, true);
        frame.len = fd_padded_len(frame.len as usize) as u8;
        frame
    }

    fn new(id: u32, data: &[u8], is_extended: bool, is_fd: bool) -> Self {
        let capacity = if is_fd { CANFD_MAX_DLEN } else { CAN_MAX_DLEN };
        let mut fixed_data = [0u8; CANFD_MAX_DLEN];
        let len = data.len().min(capacity);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed_data,
            len: len as u8,
            is_extended,
            is_fd,
            timestamp_us: 0,
        }
    }

    /// 附加时间戳
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// 将长度补齐到合法的 CAN-FD 数据长度
pub fn fd_padded_len(len: usize) -> usize {
    match len {
        0..=8 => len,
        9..=12 => 12,
        13..=16 => 16,
        17..=20 => 20,
        21..=24 => 24,
        25..=32 => 32,
        33..=48 => 48,
        _ => CANFD_MAX_DLEN,
    }
}

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid CAN ID: 0x{id:X}")]
    InvalidCanId { id: u32 },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u8 },

    #[error("Non-finite value for field {field}")]
    NonFinite { field: &'static str },
}

/// 将浮点量按量程线性映射为 `bits` 位无符号整数（超量程截断到边界）
pub fn float_to_uint(x: f64, min: f64, max: f64, bits: u32) -> u32 {
    let span = max - min;
    let steps = ((1u32 << bits) - 1) as f64;
    let clamped = x.clamp(min, max);
    (((clamped - min) * steps) / span).round() as u32
}

/// `float_to_uint` 的逆映射
pub fn uint_to_float(x: u32, min: f64, max: f64, bits: u32) -> f64 {
    let span = max - min;
    let steps = ((1u32 << bits) - 1) as f64;
    (x as f64) * span / steps + min
}

/// 量化步长：`bits` 位编码在 `[min, max]` 上的分辨率
pub fn quantization_step(min: f64, max: f64, bits: u32) -> f64 {
    (max - min) / ((1u32 << bits) - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_frame_truncates_to_8_bytes() {
        let frame = ArmFrame::new_standard(0x01, &[0xAA; 12]);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data_slice(), &[0xAA; 8]);
        assert_eq!(frame.data[8], 0);
    }

    #[test]
    fn test_fd_frame_pads_to_valid_dlc() {
        let frame = ArmFrame::new_fd(0x02, &[1u8; 10]);
        assert!(frame.is_fd);
        assert_eq!(frame.len, 12);
        assert_eq!(&frame.data_slice()[..10], &[1u8; 10]);
        assert_eq!(&frame.data_slice()[10..], &[0, 0]);

        let short = ArmFrame::new_fd(0x02, &[1u8; 8]);
        assert_eq!(short.len, 8);
    }

    #[test]
    fn test_fd_padded_len_table() {
        assert_eq!(fd_padded_len(0), 0);
        assert_eq!(fd_padded_len(8), 8);
        assert_eq!(fd_padded_len(13), 16);
        assert_eq!(fd_padded_len(33), 48);
        assert_eq!(fd_padded_len(64), 64);
    }

    #[test]
    fn test_with_timestamp() {
        let frame = ArmFrame::new_extended(0x1234_5678, &[1]).with_timestamp(42);
        assert!(frame.is_extended);
        assert_eq!(frame.timestamp_us, 42);
    }

    #[test]
    fn test_float_to_uint_bounds() {
        assert_eq!(float_to_uint(-12.5, -12.5, 12.5, 16), 0);
        assert_eq!(float_to_uint(12.5, -12.5, 12.5, 16), 0xFFFF);
        // 超量程截断
        assert_eq!(float_to_uint(100.0, -12.5, 12.5, 16), 0xFFFF);
        assert_eq!(float_to_uint(-100.0, -12.5, 12.5, 12), 0);
    }

    #[test]
    fn test_uint_to_float_inverse() {
        for &x in &[-3.0, -0.25, 0.0, 1.0, 9.99] {
            let encoded = float_to_uint(x, -12.5, 12.5, 16);
            let decoded = uint_to_float(encoded, -12.5, 12.5, 16);
            assert!((decoded - x).abs() <= quantization_step(-12.5, 12.5, 16));
        }
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidLength {
            expected: 8,
            actual: 4,
        };
        assert_eq!(format!("{}", err), "Invalid frame length: expected 8, got 4");

        let err = ProtocolError::InvalidCanId { id: 0x123 };
        assert_eq!(format!("{}", err), "Invalid CAN ID: 0x123");
    }
}
