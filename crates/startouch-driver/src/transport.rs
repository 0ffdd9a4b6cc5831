//! 传输层
//!
//! 在 [`CanAdapter`] 之上按节点收发 8 字节载荷：
//!
//! - `send_frame(node, payload)`：按适配器模式构建经典帧或 FD 帧并发送
//! - `poll_telemetry()`：首帧最多等待 `first_frame_timeout`（默认 2ms），
//!   之后不再等待，把已到达的帧一次性取完（单次上限 `max_frames_per_poll`）
//!
//! 未知 ID 的帧直接忽略；已知反馈 ID 的帧若长度错误或节点号不一致，返回
//! [`TransportError::MalformedFrame`]。

use crate::error::TransportError;
use smallvec::SmallVec;
use startouch_can::CanAdapter;
use startouch_protocol::{
    ArmFrame, JOINT_COUNT, MotorCommand, MotorFeedback, MotorLimits, NodeId, SpecialCommand,
    default_limits,
};
use std::time::Duration;
use tracing::trace;

/// 节点总数（6 关节 + 夹爪）
pub const NODE_COUNT: usize = JOINT_COUNT + 1;

/// 单次轮询返回的反馈批次（7 个节点以内不分配堆内存）
pub type TelemetryBatch = SmallVec<[Telemetry; NODE_COUNT + 1]>;

/// 传输层配置
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// 首帧等待时间
    pub first_frame_timeout: Duration,
    /// 单次轮询最多读取的帧数
    pub max_frames_per_poll: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            first_frame_timeout: Duration::from_millis(2),
            max_frames_per_poll: 64,
        }
    }
}

/// 一帧解析后的电机反馈
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub node: NodeId,
    pub feedback: MotorFeedback,
    /// 帧时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

/// 节点级传输
pub struct Transport {
    adapter: Box<dyn CanAdapter + Send>,
    limits: [MotorLimits; NODE_COUNT],
    config: TransportConfig,
    fd: bool,
}

impl Transport {
    /// 创建传输层（各节点使用默认电机量程）
    pub fn new(adapter: Box<dyn CanAdapter + Send>, config: TransportConfig) -> Self {
        let limits = std::array::from_fn(|slot| {
            NodeId::from_raw(slot as u8 + 1).map(default_limits).unwrap_or(MotorLimits::DM4310)
        });
        let fd = adapter.is_fd();
        Self {
            adapter,
            limits,
            config,
            fd,
        }
    }

    /// 覆盖某个节点的电机量程
    pub fn with_limits(mut self, node: NodeId, limits: MotorLimits) -> Self {
        self.limits[slot(node)] = limits;
        self
    }

    pub fn limits(&self, node: NodeId) -> &MotorLimits {
        &self.limits[slot(node)]
    }

    /// 是否以 CAN-FD 帧发送
    pub fn is_fd(&self) -> bool {
        self.fd
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// 向节点发送一帧载荷
    ///
    /// # 错误
    /// 适配器错误按 [`TransportError`] 分类返回，本函数不做重试。
    pub fn send_frame(&mut self, node: NodeId, payload: &[u8]) -> Result<(), TransportError> {
        let id = node.command_id() as u16;
        let frame = if self.fd {
            ArmFrame::new_fd(id, payload)
        } else {
            ArmFrame::new_standard(id, payload)
        };
        trace!("TX {} id=0x{:X} len={}", node, frame.id, frame.len);
        self.adapter.send(frame).map_err(TransportError::from)
    }

    /// 发送 MIT 阻抗指令
    pub fn send_command(&mut self, node: NodeId, command: &MotorCommand) -> Result<(), TransportError> {
        let payload =
            command
                .encode(self.limits(node))
                .map_err(|e| TransportError::MalformedFrame {
                    id: node.command_id(),
                    reason: e.to_string(),
                })?;
        self.send_frame(node, &payload)
    }

    /// 发送特殊指令（使能 / 失能 / 设零点 / 清故障）
    pub fn send_special(&mut self, node: NodeId, command: SpecialCommand) -> Result<(), TransportError> {
        self.send_frame(node, &command.payload())
    }

    /// 轮询反馈
    ///
    /// # 错误
    /// - `TransportError::Timeout`: 等待时间内没有收到任何已知节点的反馈
    /// - `TransportError::MalformedFrame`: 已知反馈 ID 的帧无法解析
    /// - 其他适配器错误
    pub fn poll_telemetry(&mut self) -> Result<TelemetryBatch, TransportError> {
        let mut batch = TelemetryBatch::new();

        let first = self.adapter.receive_timeout(self.config.first_frame_timeout)?;
        self.accept(first, &mut batch)?;

        for _ in 1..self.config.max_frames_per_poll {
            match self.adapter.try_receive()? {
                Some(frame) => self.accept(frame, &mut batch)?,
                None => break,
            }
        }

        if batch.is_empty() {
            return Err(TransportError::Timeout);
        }
        Ok(batch)
    }

    fn accept(&self, frame: ArmFrame, batch: &mut TelemetryBatch) -> Result<(), TransportError> {
        let node = match NodeId::from_feedback_id(frame.id) {
            Some(node) if !frame.is_extended => node,
            _ => {
                trace!("RX ignoring frame with ID 0x{:X}", frame.id);
                return Ok(());
            },
        };

        let feedback = MotorFeedback::from_frame(&frame, self.limits(node)).map_err(|e| {
            TransportError::MalformedFrame {
                id: frame.id,
                reason: e.to_string(),
            }
        })?;

        batch.push(Telemetry {
            node,
            feedback,
            timestamp_us: frame.timestamp_us,
        });
        Ok(())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("fd", &self.fd)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// 节点在数组中的下标（关节 0-5，夹爪 6）
pub(crate) fn slot(node: NodeId) -> usize {
    node.raw() as usize - 1
}

/// 所有节点（关节在前，夹爪可选）
pub(crate) fn nodes(with_gripper: bool) -> SmallVec<[NodeId; NODE_COUNT]> {
    let mut nodes: SmallVec<[NodeId; NODE_COUNT]> = NodeId::JOINTS.iter().copied().collect();
    if with_gripper {
        nodes.push(NodeId::Gripper);
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use startouch_can::{CanError, SimFault, SimulatedBus};
    use startouch_protocol::MotorStatus;
    use std::collections::VecDeque;

    /// 按脚本返回帧/错误的适配器
    struct ScriptedAdapter {
        rx: VecDeque<Result<ArmFrame, CanError>>,
        sent: Vec<ArmFrame>,
    }

    impl ScriptedAdapter {
        fn new(rx: Vec<Result<ArmFrame, CanError>>) -> Self {
            Self {
                rx: rx.into(),
                sent: Vec::new(),
            }
        }
    }

    impl CanAdapter for ScriptedAdapter {
        fn send(&mut self, frame: ArmFrame) -> Result<(), CanError> {
            self.sent.push(frame);
            Ok(())
        }

        fn receive(&mut self) -> Result<ArmFrame, CanError> {
            self.rx.pop_front().unwrap_or(Err(CanError::Timeout))
        }
    }

    fn feedback_frame(node: NodeId, position: f64) -> ArmFrame {
        MotorFeedback {
            node: node.raw(),
            status: MotorStatus::Enabled,
            position,
            ..Default::default()
        }
        .to_frame(&default_limits(node), false)
        .unwrap()
    }

    #[test]
    fn test_poll_drains_all_pending_frames() {
        let adapter = ScriptedAdapter::new(vec![
            Ok(feedback_frame(NodeId::Joint(0), 0.1)),
            Ok(feedback_frame(NodeId::Joint(1), 0.2)),
            Ok(feedback_frame(NodeId::Gripper, -0.3)),
        ]);
        let mut transport = Transport::new(Box::new(adapter), TransportConfig::default());
        let batch = transport.poll_telemetry().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[2].node, NodeId::Gripper);
        assert!((batch[1].feedback.position - 0.2).abs() < 1e-3);

        assert_eq!(transport.poll_telemetry(), Err(TransportError::Timeout));
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let adapter = ScriptedAdapter::new(vec![
            Ok(ArmFrame::new_standard(0x321, &[0; 8])),
            Ok(feedback_frame(NodeId::Joint(3), 0.0)),
            Ok(ArmFrame::new_extended(0x12, &[0; 8])),
        ]);
        let mut transport = Transport::new(Box::new(adapter), TransportConfig::default());
        let batch = transport.poll_telemetry().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].node, NodeId::Joint(3));
    }

    #[test]
    fn test_only_unknown_frames_is_timeout() {
        let adapter = ScriptedAdapter::new(vec![Ok(ArmFrame::new_standard(0x200, &[0; 8]))]);
        let mut transport = Transport::new(Box::new(adapter), TransportConfig::default());
        assert_eq!(transport.poll_telemetry(), Err(TransportError::Timeout));
    }

    #[test]
    fn test_short_feedback_is_malformed() {
        let adapter = ScriptedAdapter::new(vec![Ok(ArmFrame::new_standard(0x12, &[0x02, 0, 0]))]);
        let mut transport = Transport::new(Box::new(adapter), TransportConfig::default());
        assert!(matches!(
            transport.poll_telemetry(),
            Err(TransportError::MalformedFrame { id: 0x12, .. })
        ));
    }

    #[test]
    fn test_node_mismatch_is_malformed() {
        // 0x13 号反馈帧的载荷声明自己是节点 1
        let mut frame = feedback_frame(NodeId::Joint(0), 0.0);
        frame.id = 0x13;
        let adapter = ScriptedAdapter::new(vec![Ok(frame)]);
        let mut transport = Transport::new(Box::new(adapter), TransportConfig::default());
        assert!(matches!(
            transport.poll_telemetry(),
            Err(TransportError::MalformedFrame { id: 0x13, .. })
        ));
    }

    #[test]
    fn test_bus_off_surfaces_immediately() {
        let adapter = ScriptedAdapter::new(vec![Err(CanError::BusOff)]);
        let mut transport = Transport::new(Box::new(adapter), TransportConfig::default());
        assert_eq!(transport.poll_telemetry(), Err(TransportError::BusOff));
    }

    #[test]
    fn test_poll_respects_frame_cap() {
        let frames = (0..10).map(|_| Ok(feedback_frame(NodeId::Joint(0), 0.0))).collect();
        let config = TransportConfig {
            max_frames_per_poll: 4,
            ..Default::default()
        };
        let mut transport = Transport::new(Box::new(ScriptedAdapter::new(frames)), config);
        assert_eq!(transport.poll_telemetry().unwrap().len(), 4);
        assert_eq!(transport.poll_telemetry().unwrap().len(), 4);
        assert_eq!(transport.poll_telemetry().unwrap().len(), 2);
    }

    #[test]
    fn test_send_command_round_trip_through_simulated_bus() {
        let bus = SimulatedBus::new();
        let handle = bus.handle();
        let mut transport = Transport::new(Box::new(bus), TransportConfig::default());

        transport.send_special(NodeId::Joint(2), SpecialCommand::Enable).unwrap();
        let command = MotorCommand::new(0.5, 0.0, 30.0, 1.0, 0.0);
        transport.send_command(NodeId::Joint(2), &command).unwrap();

        assert!((handle.motor_position(NodeId::Joint(2)) - 0.5).abs() < 1e-3);
        let batch = transport.poll_telemetry().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].feedback.status, MotorStatus::Enabled);
        assert!((batch[1].feedback.position - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_fd_transport_sends_fd_frames() {
        let bus = SimulatedBus::new().with_fd(true);
        let handle = bus.handle();
        let mut transport = Transport::new(Box::new(bus), TransportConfig::default());
        assert!(transport.is_fd());
        transport.send_special(NodeId::Gripper, SpecialCommand::Enable).unwrap();
        let sent = handle.sent_frames();
        assert!(sent[0].is_fd);
        assert_eq!(sent[0].id, 0x07);
    }

    #[test]
    fn test_non_finite_command_rejected_before_send() {
        let bus = SimulatedBus::new();
        let handle = bus.handle();
        let mut transport = Transport::new(Box::new(bus), TransportConfig::default());
        let command = MotorCommand::new(f64::NAN, 0.0, 0.0, 0.0, 0.0);
        assert!(matches!(
            transport.send_command(NodeId::Joint(0), &command),
            Err(TransportError::MalformedFrame { id: 0x01, .. })
        ));
        assert_eq!(handle.sent_count(), 0);
    }

    #[test]
    fn test_simulated_bus_off() {
        let bus = SimulatedBus::new();
        let handle = bus.handle();
        let mut transport = Transport::new(Box::new(bus), TransportConfig::default());
        handle.inject(SimFault::BusOff);
        assert_eq!(
            transport.send_special(NodeId::Joint(0), SpecialCommand::Enable),
            Err(TransportError::BusOff)
        );
        assert_eq!(transport.poll_telemetry(), Err(TransportError::BusOff));
    }

    #[test]
    fn test_nodes_helper() {
        assert_eq!(nodes(false).len(), JOINT_COUNT);
        let all = nodes(true);
        assert_eq!(all.len(), NODE_COUNT);
        assert_eq!(all[NODE_COUNT - 1], NodeId::Gripper);
        assert_eq!(slot(NodeId::Gripper), 6);
        assert_eq!(slot(NodeId::Joint(0)), 0);
    }
}
