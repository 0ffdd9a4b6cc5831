//! 控制帧结构体定义
//!
//! - [`MotorCommand`]：MIT 阻抗控制帧（位置 + 速度 + Kp/Kd + 前馈力矩）
//! - [`SpecialCommand`]：使能 / 失能 / 设零点 / 清故障

use crate::ids::NodeId;
use crate::limits::{KD_MAX, KP_MAX, MotorLimits};
use crate::{ArmFrame, ProtocolError, float_to_uint, uint_to_float};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// MIT 帧长度
pub const MOTOR_COMMAND_LEN: usize = 8;

/// 位置字段位宽
pub const POSITION_BITS: u32 = 16;
/// 速度字段位宽
pub const VELOCITY_BITS: u32 = 12;
/// Kp/Kd 字段位宽
pub const GAIN_BITS: u32 = 12;
/// 力矩字段位宽
pub const TORQUE_BITS: u32 = 12;

/// 特殊指令
///
/// 载荷格式：`[0xFF; 7]` + 指令码
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SpecialCommand {
    /// 清除电机故障
    ClearFault = 0xFB,
    /// 使能电机
    Enable = 0xFC,
    /// 失能电机
    Disable = 0xFD,
    /// 将当前位置设为零点
    SetZero = 0xFE,
}

impl SpecialCommand {
    /// 构建 8 字节载荷
    pub fn payload(self) -> [u8; MOTOR_COMMAND_LEN] {
        let mut data = [0xFF; MOTOR_COMMAND_LEN];
        data[7] = self.into();
        data
    }

    /// 从载荷解析（非特殊指令返回 `None`）
    pub fn from_payload(data: &[u8]) -> Option<Self> {
        if data.len() < MOTOR_COMMAND_LEN || data[..7].iter().any(|&b| b != 0xFF) {
            return None;
        }
        Self::try_from(data[7]).ok()
    }

    /// 构建发往指定节点的帧
    pub fn to_frame(self, node: NodeId, fd: bool) -> ArmFrame {
        build_frame(node, &self.payload(), fd)
    }
}

/// MIT 阻抗控制指令
///
/// 电机端执行 `τ = kp·(p_des − p) + kd·(v_des − v) + τ_ff`。
///
/// # 位布局（8 字节）
///
/// ```text
/// Byte 0-1: position (16 bit)
/// Byte 2  : velocity[11:4]
/// Byte 3  : velocity[3:0] | kp[11:8]
/// Byte 4  : kp[7:0]
/// Byte 5  : kd[11:4]
/// Byte 6  : kd[3:0] | torque[11:8]
/// Byte 7  : torque[7:0]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorCommand {
    /// 目标位置（rad）
    pub position: f64,
    /// 目标速度（rad/s）
    pub velocity: f64,
    /// 位置增益（Nm/rad）
    pub kp: f64,
    /// 速度增益（Nm·s/rad）
    pub kd: f64,
    /// 前馈力矩（N·m）
    pub torque: f64,
}

impl MotorCommand {
    pub fn new(position: f64, velocity: f64, kp: f64, kd: f64, torque: f64) -> Self {
        Self {
            position,
            velocity,
            kp,
            kd,
            torque,
        }
    }

    /// 编码为 8 字节载荷
    ///
    /// 超出量程的值会被截断到量程边界。
    ///
    /// # 错误
    /// - `ProtocolError::NonFinite`: 任一字段为 NaN 或无穷大
    pub fn encode(&self, limits: &MotorLimits) -> Result<[u8; MOTOR_COMMAND_LEN], ProtocolError> {
        for (field, value) in [
            ("position", self.position),
            ("velocity", self.velocity),
            ("kp", self.kp),
            ("kd", self.kd),
            ("torque", self.torque),
        ] {
            if !value.is_finite() {
                return Err(ProtocolError::NonFinite { field });
            }
        }

        let p = float_to_uint(self.position, -limits.p_max, limits.p_max, POSITION_BITS);
        let v = float_to_uint(self.velocity, -limits.v_max, limits.v_max, VELOCITY_BITS);
        let kp = float_to_uint(self.kp, 0.0, KP_MAX, GAIN_BITS);
        let kd = float_to_uint(self.kd, 0.0, KD_MAX, GAIN_BITS);
        let t = float_to_uint(self.torque, -limits.t_max, limits.t_max, TORQUE_BITS);

        Ok([
            (p >> 8) as u8,
            (p & 0xFF) as u8,
            (v >> 4) as u8,
            (((v & 0x0F) << 4) | (kp >> 8)) as u8,
            (kp & 0xFF) as u8,
            (kd >> 4) as u8,
            (((kd & 0x0F) << 4) | (t >> 8)) as u8,
            (t & 0xFF) as u8,
        ])
    }

    /// 从 8 字节载荷解码（模拟总线与录制分析使用）
    pub fn decode(data: &[u8], limits: &MotorLimits) -> Result<Self, ProtocolError> {
        if data.len() < MOTOR_COMMAND_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: MOTOR_COMMAND_LEN,
                actual: data.len(),
            });
        }

        let p = ((data[0] as u32) << 8) | data[1] as u32;
        let v = ((data[2] as u32) << 4) | (data[3] as u32 >> 4);
        let kp = ((data[3] as u32 & 0x0F) << 8) | data[4] as u32;
        let kd = ((data[5] as u32) << 4) | (data[6] as u32 >> 4);
        let t = ((data[6] as u32 & 0x0F) << 8) | data[7] as u32;

        Ok(Self {
            position: uint_to_float(p, -limits.p_max, limits.p_max, POSITION_BITS),
            velocity: uint_to_float(v, -limits.v_max, limits.v_max, VELOCITY_BITS),
            kp: uint_to_float(kp, 0.0, KP_MAX, GAIN_BITS),
            kd: uint_to_float(kd, 0.0, KD_MAX, GAIN_BITS),
            torque: uint_to_float(t, -limits.t_max, limits.t_max, TORQUE_BITS),
        })
    }

    /// 构建发往指定节点的帧
    pub fn to_frame(
        &self,
        node: NodeId,
        limits: &MotorLimits,
        fd: bool,
    ) -> Result<ArmFrame, ProtocolError> {
        Ok(build_frame(node, &self.encode(limits)?, fd))
    }
}

fn build_frame(node: NodeId, payload: &[u8], fd: bool) -> ArmFrame {
    let id = node.command_id() as u16;
    if fd {
        ArmFrame::new_fd(id, payload)
    } else {
        ArmFrame::new_standard(id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization_step;
    use proptest::prelude::*;

    #[test]
    fn test_special_command_payload() {
        assert_eq!(
            SpecialCommand::Enable.payload(),
            [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC]
        );
        assert_eq!(
            SpecialCommand::from_payload(&SpecialCommand::Disable.payload()),
            Some(SpecialCommand::Disable)
        );
        // 普通 MIT 帧不会被识别为特殊指令
        let mit = MotorCommand::default().encode(&MotorLimits::DM4310).unwrap();
        assert_eq!(SpecialCommand::from_payload(&mit), None);
        // 未知指令码
        let mut unknown = [0xFF; 8];
        unknown[7] = 0x10;
        assert_eq!(SpecialCommand::from_payload(&unknown), None);
    }

    #[test]
    fn test_special_command_frame() {
        let frame = SpecialCommand::SetZero.to_frame(NodeId::Joint(2), false);
        assert_eq!(frame.id, 0x03);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data[7], 0xFE);
    }

    #[test]
    fn test_zero_command_encoding() {
        // 零位置/零速度/零力矩编码到量程中点
        let data = MotorCommand::default().encode(&MotorLimits::DM4310).unwrap();
        let p = ((data[0] as u16) << 8) | data[1] as u16;
        assert_eq!(p, 0x8000);
        // kp/kd = 0
        assert_eq!(data[3] & 0x0F, 0);
        assert_eq!(data[4], 0);
        assert_eq!(data[5], 0);
    }

    #[test]
    fn test_encode_rejects_nan() {
        let cmd = MotorCommand::new(f64::NAN, 0.0, 10.0, 1.0, 0.0);
        let err = cmd.encode(&MotorLimits::DM4340).unwrap_err();
        assert_eq!(err, ProtocolError::NonFinite { field: "position" });
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let limits = MotorLimits::DM4310;
        let cmd = MotorCommand::new(100.0, -100.0, 900.0, 9.0, 50.0);
        let decoded = MotorCommand::decode(&cmd.encode(&limits).unwrap(), &limits).unwrap();
        assert!((decoded.position - limits.p_max).abs() < 1e-9);
        assert!((decoded.velocity + limits.v_max).abs() < 1e-9);
        assert!((decoded.kp - KP_MAX).abs() < 1e-9);
        assert!((decoded.kd - KD_MAX).abs() < 1e-9);
        assert!((decoded.torque - limits.t_max).abs() < 1e-9);
    }

    #[test]
    fn test_decode_short_payload() {
        let err = MotorCommand::decode(&[0u8; 4], &MotorLimits::DM4310).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidLength {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[test]
    fn test_fd_frame_keeps_payload() {
        let cmd = MotorCommand::new(0.5, 0.1, 20.0, 1.0, 0.3);
        let limits = MotorLimits::DM4340;
        let frame = cmd.to_frame(NodeId::Joint(0), &limits, true).unwrap();
        assert!(frame.is_fd);
        assert_eq!(frame.len, 8);
        let decoded = MotorCommand::decode(frame.data_slice(), &limits).unwrap();
        assert!((decoded.position - 0.5).abs() < 1e-3);
    }

    proptest! {
        #[test]
        fn prop_encode_decode_within_one_step(
            position in -12.5f64..12.5,
            velocity in -10.0f64..10.0,
            kp in 0.0f64..500.0,
            kd in 0.0f64..5.0,
            torque in -28.0f64..28.0,
        ) {
            let limits = MotorLimits::DM4340;
            let cmd = MotorCommand::new(position, velocity, kp, kd, torque);
            let decoded = MotorCommand::decode(&cmd.encode(&limits).unwrap(), &limits).unwrap();

            prop_assert!((decoded.position - position).abs()
                <= quantization_step(-limits.p_max, limits.p_max, POSITION_BITS));
            prop_assert!((decoded.velocity - velocity).abs()
                <= quantization_step(-limits.v_max, limits.v_max, VELOCITY_BITS));
            prop_assert!((decoded.kp - kp).abs() <= quantization_step(0.0, KP_MAX, GAIN_BITS));
            prop_assert!((decoded.kd - kd).abs() <= quantization_step(0.0, KD_MAX, GAIN_BITS));
            prop_assert!((decoded.torque - torque).abs()
                <= quantization_step(-limits.t_max, limits.t_max, TORQUE_BITS));
        }
    }
}
