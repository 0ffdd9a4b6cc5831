//! 控制线程
//!
//! 单个控制线程独占 [`Transport`]，按 `ctrl_hz` 周期运行：
//!
//! 1. 处理非实时请求（故障恢复，crossbeam 有界通道 + 应答通道）
//! 2. 轮询反馈，更新测量状态；反馈超时 / 总线错误 / 电机故障 → Fault
//! 3. `try_lock` 取邮箱中的最新指令（被占用时沿用旧目标）
//! 4. 伺服计算目标，叠加重力补偿 / 摩擦前馈，下发 MIT 指令（超时重试）
//! 5. 通过 `ArcSwap` 发布快照
//!
//! 周期使用绝对时间锚点 + `spin_sleep`；超时的周期计数后重置锚点。

use crate::error::{DriverError, TransportError};
use crate::gripper::{GripperCommand, GripperConfig, GripperController};
use crate::metrics::ControlMetrics;
use crate::servo::{ServoCommand, ServoConfig, ServoController};
use crate::state::{ArmSnapshot, FaultReason, JointState, ServoStatus};
use crate::transport::{NODE_COUNT, Telemetry, Transport, TransportConfig, nodes, slot};
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use startouch_kinematics::{DOF, KinematicsEngine};
use startouch_protocol::{MotorCommand, MotorStatus, NodeId, SpecialCommand};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use startouch_driver::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.ctrl_hz, 400.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// 控制频率（Hz）
    pub ctrl_hz: f64,
    pub servo: ServoConfig,
    /// 夹爪参数（`None` 表示没有夹爪）
    pub gripper: Option<GripperConfig>,
    pub transport: TransportConfig,
    /// 上电时等待所有节点反馈的时间
    pub startup_timeout: Duration,
    /// 故障恢复时等待所有节点重新使能的时间
    pub recovery_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ctrl_hz: 400.0,
            servo: ServoConfig::default(),
            gripper: None,
            transport: TransportConfig::default(),
            startup_timeout: Duration::from_millis(500),
            recovery_timeout: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    /// 校验参数
    pub fn validate(&self) -> Result<(), DriverError> {
        if !self.ctrl_hz.is_finite() || self.ctrl_hz <= 0.0 || self.ctrl_hz > 2000.0 {
            return Err(DriverError::InvalidConfig(format!(
                "ctrl_hz must be in (0, 2000], got {}",
                self.ctrl_hz
            )));
        }
        self.servo.validate().map_err(DriverError::InvalidConfig)?;
        if let Some(gripper) = &self.gripper {
            gripper.validate().map_err(DriverError::InvalidConfig)?;
        }
        if self.transport.max_frames_per_poll == 0 {
            return Err(DriverError::InvalidConfig(
                "max_frames_per_poll must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// 控制周期
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.ctrl_hz)
    }
}

/// 控制线程与调用方共享的上下文
#[derive(Debug)]
pub struct ControlContext {
    /// 最新快照（读取无锁）
    pub snapshot: ArcSwap<ArmSnapshot>,
    pub metrics: ControlMetrics,
    /// 关节指令邮箱（单槽，新指令覆盖旧指令）
    pub servo_slot: Mutex<Option<ServoCommand>>,
    /// 夹爪指令邮箱
    pub gripper_slot: Mutex<Option<GripperCommand>>,
    /// 是否叠加重力补偿力矩
    pub gravity_compensation: AtomicBool,
}

impl ControlContext {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(ArmSnapshot::default()),
            metrics: ControlMetrics::new(),
            servo_slot: Mutex::new(None),
            gripper_slot: Mutex::new(None),
            gravity_compensation: AtomicBool::new(false),
        }
    }
}

impl Default for ControlContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 非实时请求
#[derive(Debug)]
pub enum ControlRequest {
    /// 清除电机故障、重新使能，伺服回到 Idle 保持测量位置
    Recover {
        reply: Sender<Result<(), DriverError>>,
    },
}

/// 各节点最近一次反馈（下标见 `transport::slot`）
pub type NodeReadings = [Option<Telemetry>; NODE_COUNT];

/// 使能节点并等待所有节点回报 `Enabled`
///
/// `clear_faults` 为真时先发送 ClearFault。
///
/// # 错误
/// - `DriverError::Transport`: 非超时的传输错误
/// - `DriverError::MotorFault`: 所有节点都已回报，但有节点处于故障状态
/// - `DriverError::NoFeedback`: 超时仍有节点未使能
pub fn bring_up(
    transport: &mut Transport,
    nodes: &[NodeId],
    clear_faults: bool,
    timeout: Duration,
) -> Result<NodeReadings, DriverError> {
    for &node in nodes {
        if clear_faults {
            transport.send_special(node, SpecialCommand::ClearFault)?;
        }
        transport.send_special(node, SpecialCommand::Enable)?;
    }

    let deadline = Instant::now() + timeout;
    let mut readings: NodeReadings = [None; NODE_COUNT];
    loop {
        match transport.poll_telemetry() {
            Ok(batch) => {
                for telemetry in batch {
                    readings[slot(telemetry.node)] = Some(telemetry);
                }
            },
            Err(TransportError::Timeout) => spin_sleep::sleep(Duration::from_micros(500)),
            Err(e) => return Err(e.into()),
        }

        let status = |node: &NodeId| readings[slot(*node)].map(|t| t.feedback.status);
        if nodes.iter().all(|n| status(n) == Some(MotorStatus::Enabled)) {
            return Ok(readings);
        }
        if nodes.iter().all(|n| status(n).is_some()) {
            if let Some((node, s)) = nodes
                .iter()
                .filter_map(|n| status(n).map(|s| (*n, s)))
                .find(|(_, s)| s.is_fault())
            {
                return Err(DriverError::MotorFault {
                    node,
                    status: format!("{:?}", s),
                });
            }
        }
        if Instant::now() >= deadline {
            let missing = nodes
                .iter()
                .copied()
                .filter(|n| status(n) != Some(MotorStatus::Enabled))
                .collect::<Vec<_>>();
            return Err(DriverError::NoFeedback(missing));
        }
    }
}

/// 失能所有节点（尽力而为）
pub fn disable_all(transport: &mut Transport, nodes: &[NodeId]) {
    for &node in nodes {
        if let Err(e) = transport.send_special(node, SpecialCommand::Disable) {
            warn!("Failed to disable {}: {}", node, e);
        }
    }
}

/// 控制循环
pub struct ControlLoop {
    transport: Transport,
    engine: Arc<KinematicsEngine>,
    ctx: Arc<ControlContext>,
    requests: Receiver<ControlRequest>,
    running: Arc<AtomicBool>,
    config: PipelineConfig,
    servo: ServoController,
    gripper: Option<GripperController>,
    joints: JointState,
    motor_status: [MotorStatus; NODE_COUNT],
    consecutive_timeouts: u32,
    tick: u64,
}

impl ControlLoop {
    /// 以上电反馈初始化，伺服保持测量位置
    pub fn new(
        transport: Transport,
        engine: Arc<KinematicsEngine>,
        ctx: Arc<ControlContext>,
        requests: Receiver<ControlRequest>,
        running: Arc<AtomicBool>,
        config: PipelineConfig,
        readings: &NodeReadings,
    ) -> Self {
        let servo = ServoController::new(config.servo.clone(), [0.0; DOF]);
        let gripper = config.gripper.clone().map(|gc| {
            let angle = readings[slot(NodeId::Gripper)]
                .map(|t| t.feedback.position)
                .unwrap_or(gc.closed_angle);
            GripperController::new(gc, angle)
        });

        let mut control = Self {
            transport,
            engine,
            ctx,
            requests,
            running,
            config,
            servo,
            gripper,
            joints: JointState::default(),
            motor_status: [MotorStatus::default(); NODE_COUNT],
            consecutive_timeouts: 0,
            tick: 0,
        };
        for telemetry in readings.iter().flatten() {
            control.record(telemetry);
        }
        control.servo.reset(control.joints.positions);
        control
    }

    /// 运行控制循环直到 `running` 被清除，退出前失能所有节点
    pub fn run(mut self) {
        #[cfg(feature = "realtime")]
        {
            use thread_priority::*;

            match set_current_thread_priority(ThreadPriority::Max) {
                Ok(_) => {
                    info!("Control thread priority set to MAX (realtime)");
                },
                Err(e) => {
                    warn!(
                        "Failed to set control thread priority: {}. \
                        On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                        e
                    );
                },
            }
        }

        let period = self.config.period();
        info!("Control thread started ({} Hz)", self.config.ctrl_hz);

        let mut next = Instant::now();
        while self.running.load(Ordering::Acquire) {
            self.tick(Instant::now());

            next += period;
            let now = Instant::now();
            if now > next {
                ControlMetrics::incr(&self.ctx.metrics.overruns);
                trace!("Control tick overrun by {:?}", now - next);
                next = now;
            } else {
                spin_sleep::sleep(next - now);
            }
        }

        self.shutdown();
        info!("Control thread stopped");
    }

    /// 执行一个控制周期
    pub fn tick(&mut self, now: Instant) {
        self.tick += 1;
        ControlMetrics::incr(&self.ctx.metrics.ticks);

        self.handle_requests();
        self.poll();
        self.dispatch(now);
        self.publish();
    }

    /// 发布当前状态
    pub fn publish(&self) {
        let snapshot = ArmSnapshot {
            joints: self.joints,
            gripper: self.gripper.as_ref().map(GripperController::state),
            servo: ServoStatus {
                mode: self.servo.mode(),
                trajectory_id: self.servo.trajectory_id(),
                target: *self.servo.target(),
                fault: self.servo.fault_reason().cloned(),
                gravity_compensation: self.ctx.gravity_compensation.load(Ordering::Relaxed),
            },
            motor_status: self.motor_status,
            tick: self.tick,
        };
        self.ctx.snapshot.store(Arc::new(snapshot));
    }

    /// 失能所有节点
    pub fn shutdown(&mut self) {
        let nodes = nodes(self.gripper.is_some());
        disable_all(&mut self.transport, &nodes);
        debug!("Disabled {} motor nodes", nodes.len());
    }

    fn handle_requests(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            match request {
                ControlRequest::Recover { reply } => {
                    let result = self.recover();
                    // 调用方可能已超时放弃等待
                    let _ = reply.send(result);
                },
            }
        }
    }

    fn recover(&mut self) -> Result<(), DriverError> {
        info!("Recovering: clearing motor faults and re-enabling nodes");
        let nodes = nodes(self.gripper.is_some());
        let readings = bring_up(
            &mut self.transport,
            &nodes,
            true,
            self.config.recovery_timeout,
        )?;
        for telemetry in readings.iter().flatten() {
            self.record(telemetry);
        }

        self.consecutive_timeouts = 0;
        self.ctx.servo_slot.lock().take();
        self.servo.reset(self.joints.positions);
        if let Some(gripper) = self.gripper.as_mut() {
            gripper.reset();
        }
        info!("✅ Recovery complete, holding measured pose");
        Ok(())
    }

    fn poll(&mut self) {
        match self.transport.poll_telemetry() {
            Ok(batch) => {
                self.consecutive_timeouts = 0;
                self.ctx
                    .metrics
                    .rx_frames
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                for telemetry in &batch {
                    self.record(telemetry);
                }
            },
            Err(TransportError::Timeout) => {
                ControlMetrics::incr(&self.ctx.metrics.rx_timeouts);
                if self.servo.is_faulted() {
                    return;
                }
                self.consecutive_timeouts += 1;
                if self.consecutive_timeouts >= self.config.servo.max_consecutive_timeouts {
                    self.enter_fault(FaultReason::TelemetryTimeout {
                        ticks: self.consecutive_timeouts,
                    });
                }
            },
            Err(e) => {
                ControlMetrics::incr(&self.ctx.metrics.device_errors);
                self.enter_fault(FaultReason::Transport(e));
            },
        }
    }

    fn record(&mut self, telemetry: &Telemetry) {
        let feedback = &telemetry.feedback;
        self.motor_status[slot(telemetry.node)] = feedback.status;

        match telemetry.node.joint_index() {
            Some(i) => {
                self.joints.positions[i] = feedback.position;
                self.joints.velocities[i] = feedback.velocity;
                self.joints.torques[i] = feedback.torque;
                self.joints.valid_mask |= 1 << i;
                self.joints.timestamp_us = self.joints.timestamp_us.max(telemetry.timestamp_us);
            },
            None => {
                if let Some(gripper) = self.gripper.as_mut() {
                    gripper.update_feedback(feedback);
                }
            },
        }

        if feedback.status.is_fault() {
            self.enter_fault(FaultReason::Motor {
                node: telemetry.node,
                status: feedback.status,
            });
        }
    }

    fn enter_fault(&mut self, reason: FaultReason) {
        if self.servo.is_faulted() {
            return;
        }
        ControlMetrics::incr(&self.ctx.metrics.faults);
        self.servo.fault(reason);
    }

    fn dispatch(&mut self, now: Instant) {
        if self.servo.is_faulted() {
            return;
        }

        match self.ctx.servo_slot.try_lock().map(|mut slot| slot.take()) {
            Some(Some(command)) => {
                if matches!(command, ServoCommand::Track(_)) {
                    ControlMetrics::incr(&self.ctx.metrics.trajectories_started);
                }
                self.servo.apply(command, now);
            },
            Some(None) => {},
            None => ControlMetrics::incr(&self.ctx.metrics.mailbox_contention),
        }

        let Some(setpoint) = self.servo.setpoint(now, &self.joints) else {
            return;
        };

        let mut feedforward = [0.0; DOF];
        if self.ctx.gravity_compensation.load(Ordering::Relaxed) {
            feedforward = self.engine.gravity_torque(&self.joints.positions);
        }
        if self.config.servo.friction_feedforward {
            let friction = self.engine.friction_torque(&setpoint.velocities);
            for (tau, f) in feedforward.iter_mut().zip(friction) {
                *tau += f;
            }
        }

        let commands = self.servo.motor_commands(&setpoint, &feedforward);
        for (node, command) in NodeId::JOINTS.iter().zip(&commands) {
            if let Err(e) = self.send_with_retry(*node, command) {
                ControlMetrics::incr(&self.ctx.metrics.device_errors);
                self.enter_fault(FaultReason::Transport(e));
                return;
            }
        }

        let gripper_command = self.gripper.as_mut().map(|gripper| {
            match self.ctx.gripper_slot.try_lock().map(|mut slot| slot.take()) {
                Some(Some(command)) => gripper.apply(command, now),
                Some(None) => {},
                None => ControlMetrics::incr(&self.ctx.metrics.mailbox_contention),
            }
            gripper.command(now)
        });
        if let Some(command) = gripper_command
            && let Err(e) = self.send_with_retry(NodeId::Gripper, &command)
        {
            ControlMetrics::incr(&self.ctx.metrics.device_errors);
            self.enter_fault(FaultReason::Transport(e));
        }
    }

    fn send_with_retry(&mut self, node: NodeId, command: &MotorCommand) -> Result<(), TransportError> {
        let mut attempt = 0;
        loop {
            match self.transport.send_command(node, command) {
                Ok(()) => {
                    ControlMetrics::incr(&self.ctx.metrics.tx_frames);
                    return Ok(());
                },
                Err(e) if e.is_transient() && attempt < self.config.servo.max_send_retries => {
                    attempt += 1;
                    ControlMetrics::incr(&self.ctx.metrics.tx_retries);
                    trace!("Retrying send to {} ({}/{})", node, attempt, self.config.servo.max_send_retries);
                },
                Err(e) => return Err(e),
            }
        }
    }
}
