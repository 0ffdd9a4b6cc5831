//! 反馈帧结构体定义
//!
//! 电机每收到一帧控制指令（MIT 帧或特殊指令）回复一帧反馈：
//!
//! ```text
//! Byte 0  : node[3:0] | status[7:4]
//! Byte 1-2: position (16 bit)
//! Byte 3  : velocity[11:4]
//! Byte 4  : velocity[3:0] | torque[11:8]
//! Byte 5  : torque[7:0]
//! Byte 6  : MOS 温度（℃）
//! Byte 7  : 转子温度（℃）
//! ```

use crate::control::{MOTOR_COMMAND_LEN, POSITION_BITS, TORQUE_BITS, VELOCITY_BITS};
use crate::ids::NodeId;
use crate::limits::MotorLimits;
use crate::{ArmFrame, ProtocolError, float_to_uint, uint_to_float};
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 反馈帧长度
pub const FEEDBACK_LEN: usize = 8;

/// 反馈帧首字节位域
///
/// bilge 按 LSB first 排布：低 4 位为节点号，高 4 位为电机状态码。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct FeedbackHeader {
    pub node: u4,   // Bit 0-3: 节点号
    pub status: u4, // Bit 4-7: 状态码
}

/// 电机状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MotorStatus {
    Disabled = 0x0,
    Enabled = 0x1,
    OverVoltage = 0x8,
    UnderVoltage = 0x9,
    OverCurrent = 0xA,
    MosOverTemperature = 0xB,
    RotorOverTemperature = 0xC,
    CommunicationLost = 0xD,
    Overload = 0xE,
}

impl Default for MotorStatus {
    fn default() -> Self {
        MotorStatus::Disabled
    }
}

impl MotorStatus {
    /// 是否为故障状态
    pub fn is_fault(self) -> bool {
        !matches!(self, MotorStatus::Disabled | MotorStatus::Enabled)
    }
}

/// 电机反馈
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorFeedback {
    /// 节点号（来自载荷首字节）
    pub node: u8,
    /// 电机状态
    pub status: MotorStatus,
    /// 位置（rad）
    pub position: f64,
    /// 速度（rad/s）
    pub velocity: f64,
    /// 力矩（N·m）
    pub torque: f64,
    /// MOS 温度（℃）
    pub temp_mos: u8,
    /// 转子温度（℃）
    pub temp_rotor: u8,
}

impl MotorFeedback {
    /// 从帧解析
    ///
    /// # 错误
    /// - `ProtocolError::InvalidCanId`: 不是反馈帧 ID，或载荷节点号与 ID 不一致
    /// - `ProtocolError::InvalidLength`: 载荷不足 8 字节
    /// - `ProtocolError::InvalidValue`: 未定义的状态码
    pub fn from_frame(frame: &ArmFrame, limits: &MotorLimits) -> Result<Self, ProtocolError> {
        let node =
            NodeId::from_feedback_id(frame.id).ok_or(ProtocolError::InvalidCanId { id: frame.id })?;
        let feedback = Self::decode(frame.data_slice(), limits)?;
        if feedback.node != node.raw() {
            return Err(ProtocolError::InvalidCanId { id: frame.id });
        }
        Ok(feedback)
    }

    /// 从载荷解码
    pub fn decode(data: &[u8], limits: &MotorLimits) -> Result<Self, ProtocolError> {
        if data.len() < FEEDBACK_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: FEEDBACK_LEN,
                actual: data.len(),
            });
        }

        let header = FeedbackHeader::from(u8::new(data[0]));
        let status_code = header.status().value();
        let status = MotorStatus::try_from(status_code).map_err(|_| ProtocolError::InvalidValue {
            field: "motor_status".to_string(),
            value: status_code,
        })?;

        let p = ((data[1] as u32) << 8) | data[2] as u32;
        let v = ((data[3] as u32) << 4) | (data[4] as u32 >> 4);
        let t = ((data[4] as u32 & 0x0F) << 8) | data[5] as u32;

        Ok(Self {
            node: header.node().value(),
            status,
            position: uint_to_float(p, -limits.p_max, limits.p_max, POSITION_BITS),
            velocity: uint_to_float(v, -limits.v_max, limits.v_max, VELOCITY_BITS),
            torque: uint_to_float(t, -limits.t_max, limits.t_max, TORQUE_BITS),
            temp_mos: data[6],
            temp_rotor: data[7],
        })
    }

    /// 编码为载荷（电机侧行为，供模拟总线使用）
    pub fn encode(&self, limits: &MotorLimits) -> [u8; FEEDBACK_LEN] {
        let header = FeedbackHeader::new(
            u4::new(self.node & 0x0F),
            u4::new(u8::from(self.status) & 0x0F),
        );
        let p = float_to_uint(self.position, -limits.p_max, limits.p_max, POSITION_BITS);
        let v = float_to_uint(self.velocity, -limits.v_max, limits.v_max, VELOCITY_BITS);
        let t = float_to_uint(self.torque, -limits.t_max, limits.t_max, TORQUE_BITS);

        [
            u8::from(header).value(),
            (p >> 8) as u8,
            (p & 0xFF) as u8,
            (v >> 4) as u8,
            (((v & 0x0F) << 4) | (t >> 8)) as u8,
            (t & 0xFF) as u8,
            self.temp_mos,
            self.temp_rotor,
        ]
    }

    /// 构建反馈帧
    pub fn to_frame(&self, limits: &MotorLimits, fd: bool) -> Result<ArmFrame, ProtocolError> {
        let node = NodeId::from_raw(self.node).ok_or(ProtocolError::InvalidValue {
            field: "node".to_string(),
            value: self.node,
        })?;
        let id = node.feedback_id() as u16;
        let payload = self.encode(limits);
        Ok(if fd {
            ArmFrame::new_fd(id, &payload)
        } else {
            ArmFrame::new_standard(id, &payload)
        })
    }
}

impl TryFrom<(ArmFrame, MotorLimits)> for MotorFeedback {
    type Error = ProtocolError;

    fn try_from((frame, limits): (ArmFrame, MotorLimits)) -> Result<Self, Self::Error> {
        Self::from_frame(&frame, &limits)
    }
}

const _: () = assert!(FEEDBACK_LEN == MOTOR_COMMAND_LEN);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization_step;

    fn sample_feedback() -> MotorFeedback {
        MotorFeedback {
            node: 3,
            status: MotorStatus::Enabled,
            position: 1.234,
            velocity: -0.5,
            torque: 2.0,
            temp_mos: 35,
            temp_rotor: 40,
        }
    }

    #[test]
    fn test_header_bit_layout() {
        let header = FeedbackHeader::from(u8::new(0x13));
        assert_eq!(header.node().value(), 3);
        assert_eq!(header.status().value(), 1);
    }

    #[test]
    fn test_feedback_roundtrip() {
        let limits = MotorLimits::DM4340;
        let original = sample_feedback();
        let frame = original.to_frame(&limits, false).unwrap();
        assert_eq!(frame.id, 0x13);

        let decoded = MotorFeedback::from_frame(&frame, &limits).unwrap();
        assert_eq!(decoded.node, 3);
        assert_eq!(decoded.status, MotorStatus::Enabled);
        assert!(
            (decoded.position - original.position).abs()
                <= quantization_step(-limits.p_max, limits.p_max, POSITION_BITS)
        );
        assert!(
            (decoded.velocity - original.velocity).abs()
                <= quantization_step(-limits.v_max, limits.v_max, VELOCITY_BITS)
        );
        assert!(
            (decoded.torque - original.torque).abs()
                <= quantization_step(-limits.t_max, limits.t_max, TORQUE_BITS)
        );
        assert_eq!(decoded.temp_mos, 35);
        assert_eq!(decoded.temp_rotor, 40);
    }

    #[test]
    fn test_feedback_invalid_length() {
        let frame = ArmFrame::new_standard(0x11, &[0x01, 0x80, 0x00]);
        let err = MotorFeedback::from_frame(&frame, &MotorLimits::DM8009).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLength { .. }));
    }

    #[test]
    fn test_feedback_node_mismatch() {
        let limits = MotorLimits::DM4310;
        let payload = sample_feedback().encode(&limits);
        // 节点号 3 的载荷出现在 J1 的反馈 ID 上
        let frame = ArmFrame::new_standard(0x11, &payload);
        let err = MotorFeedback::from_frame(&frame, &limits).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidCanId { id: 0x11 });
    }

    #[test]
    fn test_feedback_wrong_id() {
        let frame = ArmFrame::new_standard(0x05, &[0u8; 8]);
        let err = MotorFeedback::from_frame(&frame, &MotorLimits::DM4310).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidCanId { id: 0x05 });
    }

    #[test]
    fn test_unknown_status_code() {
        let mut payload = sample_feedback().encode(&MotorLimits::DM4310);
        payload[0] = 0x53; // status 0x5 未定义
        let err = MotorFeedback::decode(&payload, &MotorLimits::DM4310).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue { value: 5, .. }));
    }

    #[test]
    fn test_status_fault_classification() {
        assert!(!MotorStatus::Enabled.is_fault());
        assert!(!MotorStatus::Disabled.is_fault());
        assert!(MotorStatus::OverCurrent.is_fault());
        assert!(MotorStatus::CommunicationLost.is_fault());
    }
}
