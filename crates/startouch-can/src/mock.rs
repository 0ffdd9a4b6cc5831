//! 模拟总线
//!
//! 在内存中模拟 6 个关节电机和 1 个夹爪电机的应答行为，用于无硬件测试：
//!
//! - 特殊指令：使能 / 失能 / 设零点 / 清故障
//! - MIT 指令：电机使能且无故障时，立即到达指令位置（速度、力矩取指令值）
//! - 每帧指令回复一帧反馈（静默模式除外）
//!
//! [`SimHandle`] 与总线共享状态，测试代码通过它注入故障、检查已发送的帧。

use crate::{ArmFrame, CanAdapter, CanError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use startouch_protocol::{
    JOINT_COUNT, MotorCommand, MotorFeedback, MotorLimits, MotorStatus, NodeId, SpecialCommand,
    default_limits,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 接收队列上限（超出时丢弃最旧帧）
const RX_QUEUE_CAPACITY: usize = 1024;

/// 节点数（6 关节 + 夹爪）
const NODE_COUNT: usize = JOINT_COUNT + 1;

/// 可注入的故障
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimFault {
    /// 总线关闭：收发均返回 `CanError::BusOff`，直到 [`SimHandle::recover_bus`]
    BusOff,
    /// 下一次接收返回一次 `CanError::Timeout`
    Timeout,
    /// 下一帧反馈被截断为 3 字节
    Malformed,
    /// 电机报告故障状态（由 ClearFault 清除）
    MotorStatus(NodeId, MotorStatus),
}

#[derive(Debug, Clone)]
struct SimMotor {
    limits: MotorLimits,
    enabled: bool,
    status: MotorStatus,
    position: f64,
    velocity: f64,
    torque: f64,
}

impl SimMotor {
    fn new(limits: MotorLimits) -> Self {
        Self {
            limits,
            enabled: false,
            status: MotorStatus::Disabled,
            position: 0.0,
            velocity: 0.0,
            torque: 0.0,
        }
    }

    fn faulted(&self) -> bool {
        self.status.is_fault()
    }
}

#[derive(Debug)]
struct SimState {
    motors: Vec<SimMotor>,
    rx: VecDeque<ArmFrame>,
    sent: Vec<ArmFrame>,
    bus_off: bool,
    pending_timeouts: u32,
    malformed_next: bool,
    silent: bool,
    fd: bool,
    noise: Option<(StdRng, f64)>,
}

fn node_slot(node: NodeId) -> usize {
    node.raw() as usize - 1
}

impl SimState {
    fn handle_frame(&mut self, frame: &ArmFrame) {
        let Some(node) = NodeId::from_raw(frame.id as u8).filter(|_| frame.id <= 0xFF) else {
            trace!("SimulatedBus: ignoring frame with ID 0x{:X}", frame.id);
            return;
        };
        let slot = node_slot(node);
        let data = frame.data_slice();

        if let Some(special) = SpecialCommand::from_payload(data) {
            let motor = &mut self.motors[slot];
            match special {
                SpecialCommand::Enable => {
                    if !motor.faulted() {
                        motor.enabled = true;
                        motor.status = MotorStatus::Enabled;
                    }
                },
                SpecialCommand::Disable => {
                    motor.enabled = false;
                    if !motor.faulted() {
                        motor.status = MotorStatus::Disabled;
                    }
                },
                SpecialCommand::SetZero => {
                    motor.position = 0.0;
                },
                SpecialCommand::ClearFault => {
                    motor.enabled = false;
                    motor.status = MotorStatus::Disabled;
                },
            }
            debug!("SimulatedBus: {} <- {:?}", node, special);
        } else {
            let motor = &mut self.motors[slot];
            match MotorCommand::decode(data, &motor.limits) {
                Ok(cmd) if motor.enabled && !motor.faulted() => {
                    motor.position = cmd.position;
                    motor.velocity = cmd.velocity;
                    motor.torque = cmd.torque;
                },
                Ok(_) => {
                    trace!("SimulatedBus: {} not enabled, command ignored", node);
                },
                Err(e) => {
                    warn!("SimulatedBus: bad command payload for {}: {}", node, e);
                    return;
                },
            }
        }

        if !self.silent {
            self.reply(node);
        }
    }

    fn reply(&mut self, node: NodeId) {
        let slot = node_slot(node);
        let motor = &self.motors[slot];
        let mut position = motor.position;
        if let Some((rng, amplitude)) = self.noise.as_mut() {
            if *amplitude > 0.0 {
                position += rng.gen_range(-*amplitude..*amplitude);
            }
        }
        let feedback = MotorFeedback {
            node: node.raw(),
            status: motor.status,
            position,
            velocity: motor.velocity,
            torque: motor.torque,
            temp_mos: 30,
            temp_rotor: 32,
        };

        let mut frame = match feedback.to_frame(&motor.limits, self.fd) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("SimulatedBus: failed to build feedback for {}: {}", node, e);
                return;
            },
        };
        if self.malformed_next {
            self.malformed_next = false;
            frame.len = 3;
        }

        if self.rx.len() >= RX_QUEUE_CAPACITY {
            self.rx.pop_front();
        }
        self.rx.push_back(frame);
    }
}

/// 模拟 CAN 总线
#[derive(Debug)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    /// 创建经典 CAN 模拟总线（所有电机位于零位、未使能）
    pub fn new() -> Self {
        let motors = NodeId::JOINTS
            .iter()
            .copied()
            .chain(std::iter::once(NodeId::Gripper))
            .map(|node| SimMotor::new(default_limits(node)))
            .collect::<Vec<_>>();
        debug_assert_eq!(motors.len(), NODE_COUNT);

        Self {
            state: Arc::new(Mutex::new(SimState {
                motors,
                rx: VecDeque::new(),
                sent: Vec::new(),
                bus_off: false,
                pending_timeouts: 0,
                malformed_next: false,
                silent: false,
                fd: false,
                noise: None,
            })),
        }
    }

    /// 以 CAN-FD 模式应答
    pub fn with_fd(self, fd: bool) -> Self {
        self.state.lock().fd = fd;
        self
    }

    /// 设置初始关节位置
    pub fn with_joint_positions(self, positions: [f64; JOINT_COUNT]) -> Self {
        {
            let mut state = self.state.lock();
            for (motor, position) in state.motors.iter_mut().zip(positions) {
                motor.position = position;
            }
        }
        self
    }

    /// 反馈位置叠加均匀噪声（固定种子，可复现）
    pub fn with_noise(self, seed: u64, amplitude: f64) -> Self {
        self.state.lock().noise = Some((StdRng::seed_from_u64(seed), amplitude.abs()));
        self
    }

    /// 获取共享句柄
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CanAdapter for SimulatedBus {
    fn send(&mut self, frame: ArmFrame) -> Result<(), CanError> {
        let mut state = self.state.lock();
        if state.bus_off {
            return Err(CanError::BusOff);
        }
        if frame.is_fd && !state.fd {
            return Err(CanError::Malformed(format!(
                "CAN-FD frame 0x{:X} on classic bus",
                frame.id
            )));
        }
        state.sent.push(frame);
        state.handle_frame(&frame);
        Ok(())
    }

    /// 立即返回队首帧；队列为空时返回 `CanError::Timeout`（不等待）
    fn receive(&mut self) -> Result<ArmFrame, CanError> {
        let mut state = self.state.lock();
        if state.bus_off {
            return Err(CanError::BusOff);
        }
        if state.pending_timeouts > 0 {
            state.pending_timeouts -= 1;
            return Err(CanError::Timeout);
        }
        state.rx.pop_front().ok_or(CanError::Timeout)
    }

    fn receive_timeout(&mut self, _timeout: Duration) -> Result<ArmFrame, CanError> {
        self.receive()
    }

    fn is_fd(&self) -> bool {
        self.state.lock().fd
    }
}

/// 模拟总线的共享句柄（测试侧）
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// 注入故障
    pub fn inject(&self, fault: SimFault) {
        let mut state = self.state.lock();
        match fault {
            SimFault::BusOff => state.bus_off = true,
            SimFault::Timeout => state.pending_timeouts += 1,
            SimFault::Malformed => state.malformed_next = true,
            SimFault::MotorStatus(node, status) => {
                let motor = &mut state.motors[node_slot(node)];
                motor.status = status;
                if status.is_fault() {
                    motor.enabled = false;
                }
            },
        }
        debug!("SimulatedBus: injected {:?}", fault);
    }

    /// 退出 Bus Off 状态
    pub fn recover_bus(&self) {
        self.state.lock().bus_off = false;
    }

    /// 静默模式：电机不再应答
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// 直接向接收队列注入一帧
    pub fn push_rx(&self, frame: ArmFrame) {
        self.state.lock().rx.push_back(frame);
    }

    /// 已发送的全部帧
    pub fn sent_frames(&self) -> Vec<ArmFrame> {
        self.state.lock().sent.clone()
    }

    /// 已发送帧数
    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    /// 清空发送记录
    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// 发往指定节点的 MIT 指令（按发送顺序解码）
    pub fn sent_commands(&self, node: NodeId) -> Vec<MotorCommand> {
        let state = self.state.lock();
        let limits = state.motors[node_slot(node)].limits;
        state
            .sent
            .iter()
            .filter(|f| f.id == node.command_id())
            .filter(|f| SpecialCommand::from_payload(f.data_slice()).is_none())
            .filter_map(|f| MotorCommand::decode(f.data_slice(), &limits).ok())
            .collect()
    }

    /// 发往指定节点的特殊指令
    pub fn sent_special(&self, node: NodeId) -> Vec<SpecialCommand> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|f| f.id == node.command_id())
            .filter_map(|f| SpecialCommand::from_payload(f.data_slice()))
            .collect()
    }

    /// 电机当前位置
    pub fn motor_position(&self, node: NodeId) -> f64 {
        self.state.lock().motors[node_slot(node)].position
    }

    /// 强制设置电机位置（模拟外力拖动）
    pub fn set_position(&self, node: NodeId, position: f64) {
        self.state.lock().motors[node_slot(node)].position = position;
    }

    /// 电机是否已使能
    pub fn is_enabled(&self, node: NodeId) -> bool {
        self.state.lock().motors[node_slot(node)].enabled
    }

    /// 电机状态码
    pub fn motor_status(&self, node: NodeId) -> MotorStatus {
        self.state.lock().motors[node_slot(node)].status
    }
}
