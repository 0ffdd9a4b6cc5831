//! 机械臂驱动
//!
//! [`ArmDriver`] 负责上电、启动控制线程，并向调用方提供无锁状态读取和非阻塞指令下发。
//! 所有指令只写入邮箱，由控制线程在下一个周期取走。

use crate::error::DriverError;
use crate::gripper::{GripperCommand, GripperConfig, GripperTarget, validate_position};
use crate::metrics::{ControlMetrics, MetricsSnapshot};
use crate::pipeline::{
    ControlContext, ControlLoop, ControlRequest, PipelineConfig, bring_up, disable_all,
};
use crate::servo::ServoCommand;
use crate::state::{ArmSnapshot, ServoMode};
use crate::transport::{Transport, nodes};
use crossbeam_channel::Sender;
use startouch_can::CanAdapter;
use startouch_kinematics::KinematicsEngine;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: std::marker::Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // watchdog 线程负责 join，超时后继续留在后台
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 非实时请求队列容量
const REQUEST_QUEUE_CAPACITY: usize = 4;

/// 控制线程退出等待时间
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 机械臂驱动（控制线程句柄）
pub struct ArmDriver {
    ctx: Arc<ControlContext>,
    requests: Sender<ControlRequest>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    gripper: Option<GripperConfig>,
    ctrl_hz: f64,
}

impl ArmDriver {
    /// 上电并启动控制线程
    ///
    /// 依次使能所有节点，等待全部回报 `Enabled` 后以测量位置作为保持目标启动控制线程。
    /// 上电失败时尽力失能已使能的节点。
    ///
    /// # 错误
    /// - `DriverError::InvalidConfig`: 配置校验失败
    /// - `DriverError::NoFeedback`: 限定时间内有节点未使能
    /// - `DriverError::MotorFault`: 节点报告故障
    /// - `DriverError::ControlThread`: 线程创建失败
    pub fn start(
        adapter: impl CanAdapter + Send + 'static,
        engine: Arc<KinematicsEngine>,
        config: PipelineConfig,
    ) -> Result<Self, DriverError> {
        config.validate()?;

        let mut transport = Transport::new(Box::new(adapter), config.transport.clone());
        let nodes = nodes(config.gripper.is_some());
        let readings = match bring_up(&mut transport, &nodes, false, config.startup_timeout) {
            Ok(readings) => readings,
            Err(e) => {
                error!("Bring-up failed: {}", e);
                disable_all(&mut transport, &nodes);
                return Err(e);
            },
        };
        info!("✅ All {} motor nodes enabled", nodes.len());

        let ctx = Arc::new(ControlContext::new());
        let running = Arc::new(AtomicBool::new(true));
        let (requests_tx, requests_rx) = crossbeam_channel::bounded(REQUEST_QUEUE_CAPACITY);
        let gripper = config.gripper.clone();
        let ctrl_hz = config.ctrl_hz;

        let control = ControlLoop::new(
            transport,
            engine,
            ctx.clone(),
            requests_rx,
            running.clone(),
            config,
            &readings,
        );
        // 线程启动前发布初始状态，start 返回后即可读取
        control.publish();

        let thread = std::thread::Builder::new()
            .name("startouch-control".to_string())
            .spawn(move || control.run())
            .map_err(|e| DriverError::ControlThread(e.to_string()))?;

        Ok(Self {
            ctx,
            requests: requests_tx,
            running,
            thread: Some(thread),
            gripper,
            ctrl_hz,
        })
    }

    /// 最新快照（无锁）
    pub fn snapshot(&self) -> Arc<ArmSnapshot> {
        self.ctx.snapshot.load_full()
    }

    /// 性能指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// 控制线程是否仍在运行
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn ctrl_hz(&self) -> f64 {
        self.ctrl_hz
    }

    pub fn has_gripper(&self) -> bool {
        self.gripper.is_some()
    }

    pub fn gripper_config(&self) -> Option<&GripperConfig> {
        self.gripper.as_ref()
    }

    /// 下发关节指令（非阻塞，覆盖尚未被取走的旧指令）
    ///
    /// # 错误
    /// - `DriverError::ControlThreadStopped`: 控制线程已退出
    pub fn submit(&self, command: ServoCommand) -> Result<(), DriverError> {
        if !self.is_running() {
            return Err(DriverError::ControlThreadStopped);
        }
        if self.ctx.servo_slot.lock().replace(command).is_some() {
            ControlMetrics::incr(&self.ctx.metrics.commands_superseded);
        }
        Ok(())
    }

    /// 下发夹爪指令（非阻塞）
    ///
    /// 超出 `[0, 1]` 的开度被截断并告警，返回实际使用的目标。
    ///
    /// # 错误
    /// - `DriverError::GripperAbsent`: 未配置夹爪
    /// - `DriverError::InvalidPosition`: 开度为 NaN
    /// - `DriverError::ControlThreadStopped`: 控制线程已退出
    pub fn submit_gripper(&self, position: f64, raw: bool) -> Result<GripperTarget, DriverError> {
        let config = self.gripper.as_ref().ok_or(DriverError::GripperAbsent)?;
        let target = validate_position(position, config)?;
        if !self.is_running() {
            return Err(DriverError::ControlThreadStopped);
        }
        if target.clamped {
            ControlMetrics::incr(&self.ctx.metrics.gripper_clamped);
        }
        if target.near_zero {
            ControlMetrics::incr(&self.ctx.metrics.gripper_near_zero);
        }

        let command = if raw {
            GripperCommand::Raw(target.position)
        } else {
            GripperCommand::Planned(target.position)
        };
        if self.ctx.gripper_slot.lock().replace(command).is_some() {
            ControlMetrics::incr(&self.ctx.metrics.commands_superseded);
        }
        Ok(target)
    }

    /// 开启 / 关闭重力补偿前馈
    pub fn set_gravity_compensation(&self, enabled: bool) {
        let previous = self.ctx.gravity_compensation.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            info!(
                "Gravity compensation {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn gravity_compensation(&self) -> bool {
        self.ctx.gravity_compensation.load(Ordering::Relaxed)
    }

    /// 清除故障并重新使能（阻塞直到控制线程完成或超时）
    ///
    /// 成功后伺服回到 Idle，保持当前测量位置。
    ///
    /// # 错误
    /// - `DriverError::Timeout`: 控制线程未在 `timeout` 内完成
    /// - `DriverError::ControlThreadStopped`: 控制线程已退出
    /// - 其他：恢复过程中的上电错误
    pub fn recover(&self, timeout: Duration) -> Result<(), DriverError> {
        if !self.is_running() {
            return Err(DriverError::ControlThreadStopped);
        }
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.requests
            .send_timeout(ControlRequest::Recover { reply: reply_tx }, timeout)
            .map_err(|e| match e {
                crossbeam_channel::SendTimeoutError::Timeout(_) => DriverError::Timeout,
                crossbeam_channel::SendTimeoutError::Disconnected(_) => {
                    DriverError::ControlThreadStopped
                },
            })?;
        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(DriverError::Timeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(DriverError::ControlThreadStopped)
            },
        }
    }

    /// 轮询快照直到满足条件
    ///
    /// # 错误
    /// - `DriverError::Timeout`: 超时仍未满足
    pub fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl Fn(&ArmSnapshot) -> bool,
    ) -> Result<Arc<ArmSnapshot>, DriverError> {
        let start = Instant::now();
        loop {
            let snapshot = self.snapshot();
            if predicate(&snapshot) {
                return Ok(snapshot);
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::Timeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// 等待当前运动结束（伺服回到 Idle 或进入故障）
    pub fn wait_idle(&self, timeout: Duration) -> Result<Arc<ArmSnapshot>, DriverError> {
        self.wait_for(timeout, |s| {
            matches!(s.servo.mode, ServoMode::Idle | ServoMode::Fault)
                && self.ctx.servo_slot.lock().is_none()
        })
    }

    /// 停止控制线程并失能所有电机（可重复调用）
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if let Err(_e) = handle.join_timeout(JOIN_TIMEOUT) {
                error!(
                    "Control thread panicked or failed to shut down within {:?}",
                    JOIN_TIMEOUT
                );
            } else {
                info!("Control thread joined");
            }
        }
    }
}

impl std::fmt::Debug for ArmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmDriver")
            .field("ctrl_hz", &self.ctrl_hz)
            .field("gripper", &self.gripper.is_some())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for ArmDriver {
    fn drop(&mut self) {
        if self.thread.is_some() {
            warn!("ArmDriver dropped without explicit shutdown");
        }
        self.shutdown();
    }
}
