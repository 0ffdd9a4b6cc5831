//! 机械臂会话
//!
//! [`ArmSession`] 持有控制线程、运动学引擎与配置，对外提供关节 / 笛卡尔运动、
//! 夹爪、状态读取、重力补偿、回零与清理接口。
//!
//! - 所有运动指令非阻塞：规划在调用方线程完成，结果写入邮箱后立即返回
//! - 规划总是从最新的**测量**关节状态开始（新指令直接替换正在执行的轨迹）
//! - 故障状态下除 `go_home` 外的指令都返回 [`SessionError::Faulted`]
//! - `cleanup` 可重复调用，`Drop` 时自动调用

use crate::config::{ArmConfig, HOME_POSE};
use crate::error::SessionError;
use parking_lot::RwLock;
use startouch_can::CanAdapter;
use startouch_driver::{
    ArmDriver, ArmSnapshot, GripperState, JointState, MetricsSnapshot, ServoCommand, ServoStatus,
    Trajectory, TrajectoryPlanner,
};
use startouch_kinematics::{
    CalibrationSet, DOF, JointAngles, KinematicsEngine, KinematicsError, Pose,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// 故障恢复在控制线程超时之外额外等待的时间
const RECOVERY_MARGIN: Duration = Duration::from_secs(1);

/// 机械臂会话
///
/// # 示例
///
/// ```no_run
/// use startouch_client::{ArmConfig, ArmSession};
///
/// use startouch_kinematics::CalibrationPaths;
///
/// let config = ArmConfig::new("can0", CalibrationPaths::in_dir("/etc/startouch")).with_gripper(true);
/// let session = ArmSession::new(config)?;
/// session.set_joint(&[0.0, 0.5, 0.5, 0.0, 0.0, 0.0], 2.0)?;
/// session.open_gripper()?;
/// let q = session.get_joint_positions()?;
/// println!("{:?}", q);
/// session.cleanup();
/// # Ok::<(), startouch_client::SessionError>(())
/// ```
pub struct ArmSession {
    config: ArmConfig,
    engine: Arc<KinematicsEngine>,
    planner: TrajectoryPlanner,
    driver: RwLock<Option<ArmDriver>>,
    closed: AtomicBool,
}

impl ArmSession {
    /// 打开 SocketCAN 接口并创建会话
    ///
    /// # 错误
    /// - `SessionError::Config`: 配置校验失败
    /// - `SessionError::Calibration`: 标定文件缺失或格式错误
    /// - `SessionError::Transport`: 接口不存在 / 未启动
    /// - `SessionError::Driver`: 上电失败（节点无反馈或报告故障）
    #[cfg(target_os = "linux")]
    pub fn new(config: ArmConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let adapter =
            startouch_can::SocketCanAdapter::open(config.can_interface.clone(), config.enable_fd)
                .map_err(startouch_driver::TransportError::from)?;
        Self::with_adapter(config, adapter)
    }

    /// SocketCAN 仅在 Linux 上可用
    #[cfg(not(target_os = "linux"))]
    pub fn new(config: ArmConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Err(startouch_driver::TransportError::Device(
            "SocketCAN is only available on Linux; use ArmSession::with_adapter".to_string(),
        )
        .into())
    }

    /// 使用指定的 CAN 适配器创建会话
    ///
    /// 依次：校验配置 → 加载标定 → 使能所有节点并等待反馈 → 启动控制线程。
    /// 任一步失败都会释放已获取的资源。
    pub fn with_adapter(
        config: ArmConfig,
        adapter: impl CanAdapter + Send + 'static,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let calibration = CalibrationSet::load(&config.calibration)?;
        let engine = Arc::new(
            KinematicsEngine::new(config.geometry.clone(), config.ik.clone())
                .with_calibration(Arc::new(calibration)),
        );
        let planner =
            TrajectoryPlanner::new(engine.clone()).with_max_joint_step(config.max_joint_step);

        let driver = ArmDriver::start(adapter, engine.clone(), config.pipeline_config())?;
        info!(
            "✅ Session ready on {} ({} Hz, gripper: {})",
            config.can_interface, config.ctrl_hz, config.gripper_exist
        );

        Ok(Self {
            config,
            engine,
            planner,
            driver: RwLock::new(Some(driver)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ArmConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<KinematicsEngine> {
        &self.engine
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn with_driver<T>(
        &self,
        f: impl FnOnce(&ArmDriver) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let guard = self.driver.read();
        let driver = guard.as_ref().ok_or(SessionError::Closed)?;
        f(driver)
    }

    /// 检查控制线程可用且未处于故障状态，返回最新快照
    fn ready(driver: &ArmDriver) -> Result<Arc<ArmSnapshot>, SessionError> {
        if !driver.is_running() {
            return Err(SessionError::ControlThread(
                "control thread stopped".to_string(),
            ));
        }
        let snapshot = driver.snapshot();
        if let Some(reason) = &snapshot.servo.fault {
            return Err(SessionError::Faulted(reason.clone()));
        }
        Ok(snapshot)
    }

    fn track(driver: &ArmDriver, trajectory: Trajectory) -> Result<Arc<Trajectory>, SessionError> {
        let trajectory = Arc::new(trajectory);
        driver.submit(ServoCommand::Track(trajectory.clone()))?;
        debug!(
            "Trajectory #{} submitted ({} samples, {:.3}s)",
            trajectory.id(),
            trajectory.len(),
            trajectory.duration()
        );
        Ok(trajectory)
    }

    // ==================== 关节空间 ====================

    /// 关节空间规划运动（会话控制频率）
    ///
    /// # 参数
    /// - `positions`: 目标关节角（rad）
    /// - `tf`: 运动时长（s），必须为正
    ///
    /// # 错误
    /// - `SessionError::InvalidDuration`: `tf` 非正 / 非有限 / 短于一个控制周期
    /// - `SessionError::Faulted`: 伺服处于故障状态
    pub fn set_joint(&self, positions: &JointAngles, tf: f64) -> Result<Arc<Trajectory>, SessionError> {
        self.set_joint_with_rate(positions, tf, self.config.ctrl_hz)
    }

    /// 关节空间规划运动，指定采样频率
    ///
    /// 采样频率可以与控制频率不同，控制线程按时间插值取点。
    pub fn set_joint_with_rate(
        &self,
        positions: &JointAngles,
        tf: f64,
        ctrl_hz: f64,
    ) -> Result<Arc<Trajectory>, SessionError> {
        self.with_driver(|driver| {
            let snapshot = Self::ready(driver)?;
            let trajectory =
                self.planner
                    .plan_joint(&snapshot.joints.positions, positions, tf, ctrl_hz)?;
            Self::track(driver, trajectory)
        })
    }

    /// 直接下发关节设定点（不规划，不限速）
    ///
    /// `velocities` 只在首个控制周期下发，之后零速保持目标位置。
    pub fn set_joint_raw(
        &self,
        positions: &JointAngles,
        velocities: &JointAngles,
    ) -> Result<(), SessionError> {
        if let Some(v) = positions.iter().chain(velocities).find(|v| !v.is_finite()) {
            return Err(SessionError::InvalidPosition(*v));
        }
        self.with_driver(|driver| {
            Self::ready(driver)?;
            driver.submit(ServoCommand::Raw {
                positions: *positions,
                velocities: *velocities,
            })?;
            Ok(())
        })
    }

    // ==================== 笛卡尔空间 ====================

    /// 笛卡尔直线规划运动（欧拉角目标）
    ///
    /// 目标逆解失败时立即返回，不影响当前运动。
    ///
    /// # 错误
    /// - `SessionError::InvalidDuration`
    /// - `SessionError::Kinematics`: 目标或中间点不可达 / 接近奇异
    /// - `SessionError::Plan`: 路径上关节跳变过大
    /// - `SessionError::Faulted`
    pub fn set_end_effector_pose(&self, pose: &Pose, tf: f64) -> Result<Arc<Trajectory>, SessionError> {
        self.set_end_effector_pose_with_rate(pose, tf, self.config.ctrl_hz)
    }

    pub fn set_end_effector_pose_with_rate(
        &self,
        pose: &Pose,
        tf: f64,
        ctrl_hz: f64,
    ) -> Result<Arc<Trajectory>, SessionError> {
        if !pose.is_finite() {
            return Err(KinematicsError::NonFinite("pose").into());
        }
        self.with_driver(|driver| {
            let snapshot = Self::ready(driver)?;
            let q = snapshot.joints.positions;
            let start = self.engine.forward(&q);
            let trajectory = self.planner.plan_pose(&start, pose, tf, ctrl_hz, &q)?;
            Self::track(driver, trajectory)
        })
    }

    /// 笛卡尔直线规划运动（四元数 `[w, x, y, z]` 目标）
    pub fn set_end_effector_pose_quat(
        &self,
        position: [f64; 3],
        quaternion: [f64; 4],
        tf: f64,
    ) -> Result<Arc<Trajectory>, SessionError> {
        let pose = Pose::from_quaternion(position, quaternion)?;
        self.set_end_effector_pose(&pose, tf)
    }

    /// 直接下发笛卡尔目标：以当前测量关节角为初值求逆解，作为关节设定点下发
    pub fn set_end_effector_pose_raw(&self, pose: &Pose) -> Result<(), SessionError> {
        if !pose.is_finite() {
            return Err(KinematicsError::NonFinite("pose").into());
        }
        self.with_driver(|driver| {
            let snapshot = Self::ready(driver)?;
            let positions = self.engine.inverse(pose, &snapshot.joints.positions)?;
            driver.submit(ServoCommand::Raw {
                positions,
                velocities: [0.0; DOF],
            })?;
            Ok(())
        })
    }

    /// 直接下发笛卡尔目标（四元数 `[w, x, y, z]`）
    pub fn set_end_effector_pose_quat_raw(
        &self,
        position: [f64; 3],
        quaternion: [f64; 4],
    ) -> Result<(), SessionError> {
        let pose = Pose::from_quaternion(position, quaternion)?;
        self.set_end_effector_pose_raw(&pose)
    }

    // ==================== 状态读取 ====================

    /// 最新快照（无锁）
    pub fn snapshot(&self) -> Result<Arc<ArmSnapshot>, SessionError> {
        self.with_driver(|driver| Ok(driver.snapshot()))
    }

    pub fn get_joint_state(&self) -> Result<JointState, SessionError> {
        Ok(self.snapshot()?.joints)
    }

    pub fn get_joint_positions(&self) -> Result<JointAngles, SessionError> {
        Ok(self.snapshot()?.joints.positions)
    }

    pub fn get_joint_velocities(&self) -> Result<JointAngles, SessionError> {
        Ok(self.snapshot()?.joints.velocities)
    }

    pub fn get_joint_torques(&self) -> Result<JointAngles, SessionError> {
        Ok(self.snapshot()?.joints.torques)
    }

    /// 末端位姿（测量关节角的正解，欧拉角形式）
    pub fn get_end_effector_pose(&self) -> Result<Pose, SessionError> {
        let q = self.get_joint_positions()?;
        Ok(self.engine.forward(&q))
    }

    /// 末端位姿（位置 + 四元数 `[w, x, y, z]`）
    pub fn get_end_effector_quaternion(&self) -> Result<([f64; 3], [f64; 4]), SessionError> {
        let pose = self.get_end_effector_pose()?;
        Ok((pose.position, pose.quaternion()))
    }

    pub fn servo_state(&self) -> Result<ServoStatus, SessionError> {
        Ok(self.snapshot()?.servo.clone())
    }

    pub fn is_faulted(&self) -> Result<bool, SessionError> {
        Ok(self.snapshot()?.is_faulted())
    }

    pub fn metrics(&self) -> Result<MetricsSnapshot, SessionError> {
        self.with_driver(|driver| Ok(driver.metrics()))
    }

    /// 等待当前运动结束（伺服回到 Idle 或进入故障）
    pub fn wait_for_motion(&self, timeout: Duration) -> Result<Arc<ArmSnapshot>, SessionError> {
        self.with_driver(|driver| Ok(driver.wait_idle(timeout)?))
    }

    // ==================== 重力补偿 ====================

    /// 开启 / 关闭重力补偿前馈
    ///
    /// # 错误
    /// - `SessionError::Faulted`: 故障状态下开启
    pub fn gravity_compensation(&self, enable: bool) -> Result<(), SessionError> {
        self.with_driver(|driver| {
            if enable {
                Self::ready(driver)?;
            }
            driver.set_gravity_compensation(enable);
            Ok(())
        })
    }

    // ==================== 夹爪 ====================

    /// 张开夹爪（规划运动）
    pub fn open_gripper(&self) -> Result<f64, SessionError> {
        self.set_gripper_position(1.0)
    }

    /// 闭合夹爪（规划运动）
    pub fn close_gripper(&self) -> Result<f64, SessionError> {
        self.set_gripper_position(0.0)
    }

    /// 夹爪规划运动到开度 `position ∈ [0, 1]`，超出范围截断，返回实际目标
    pub fn set_gripper_position(&self, position: f64) -> Result<f64, SessionError> {
        self.submit_gripper(position, false)
    }

    /// 直接下发夹爪开度
    pub fn set_gripper_position_raw(&self, position: f64) -> Result<f64, SessionError> {
        self.submit_gripper(position, true)
    }

    fn submit_gripper(&self, position: f64, raw: bool) -> Result<f64, SessionError> {
        self.with_driver(|driver| {
            if !driver.has_gripper() {
                return Err(SessionError::GripperAbsent);
            }
            Self::ready(driver)?;
            Ok(driver.submit_gripper(position, raw)?.position)
        })
    }

    /// 夹爪测量开度 `[0, 1]`
    pub fn get_gripper_position(&self) -> Result<f64, SessionError> {
        Ok(self.get_gripper_state()?.position)
    }

    pub fn get_gripper_state(&self) -> Result<GripperState, SessionError> {
        self.snapshot()?.gripper.ok_or(SessionError::GripperAbsent)
    }

    // ==================== 回零 / 清理 ====================

    /// 回零
    ///
    /// 若处于故障状态，先清除电机故障并重新使能（伺服保持测量位置），
    /// 再以 `home_duration` 规划到 [`HOME_POSE`]。
    pub fn go_home(&self) -> Result<Arc<Trajectory>, SessionError> {
        self.with_driver(|driver| {
            let wait = self.config.recovery_timeout() + RECOVERY_MARGIN;
            if let Some(reason) = &driver.snapshot().servo.fault {
                info!("Recovering from fault before homing: {}", reason);
                driver.recover(wait)?;
                driver.wait_for(wait, |s| !s.is_faulted())?;
            }
            let snapshot = Self::ready(driver)?;
            let trajectory = self.planner.plan_joint(
                &snapshot.joints.positions,
                &HOME_POSE,
                self.config.home_duration,
                self.config.ctrl_hz,
            )?;
            info!("Homing over {:.1}s", self.config.home_duration);
            Self::track(driver, trajectory)
        })
    }

    /// 停止控制线程、失能所有电机并释放传输层（可重复调用）
    pub fn cleanup(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut driver) = self.driver.write().take() {
            driver.shutdown();
        }
        info!("Session on {} closed", self.config.can_interface);
    }
}

impl std::fmt::Debug for ArmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmSession")
            .field("can_interface", &self.config.can_interface)
            .field("gripper_exist", &self.config.gripper_exist)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for ArmSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::error::ConfigError;
    use serial_test::serial;
    use startouch_can::{SimFault, SimulatedBus};
    use startouch_driver::{FaultReason, ServoMode, TransportError};
    use startouch_kinematics::CalibrationPaths;
    use std::sync::OnceLock;

    const Q_A: JointAngles = [0.2, -0.5, 0.7, 0.3, -0.4, 0.1];

    /// 零参数标定文件（整个测试进程共用）
    fn calibration() -> CalibrationPaths {
        static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
        let dir = DIR.get_or_init(|| {
            let dir = tempfile::tempdir().unwrap();
            CalibrationSet::neutral()
                .save(&CalibrationPaths::in_dir(dir.path()))
                .unwrap();
            dir
        });
        CalibrationPaths::in_dir(dir.path())
    }

    fn sim_config() -> ArmConfig {
        ArmConfig::new("sim0", calibration())
    }

    fn session(bus: SimulatedBus, gripper: bool) -> ArmSession {
        ArmSession::with_adapter(sim_config().with_gripper(gripper), bus).unwrap()
    }

    #[test]
    #[serial]
    fn test_initial_state_is_measured() {
        let session = session(SimulatedBus::new().with_joint_positions(Q_A), false);
        let q = session.get_joint_positions().unwrap();
        for i in 0..DOF {
            assert_relative_eq!(q[i], Q_A[i], epsilon = 1e-3);
        }
        assert_eq!(session.servo_state().unwrap().mode, ServoMode::Idle);
    }

    #[test]
    #[serial]
    fn test_set_joint_reaches_target() {
        let session = session(SimulatedBus::new(), false);
        let trajectory = session.set_joint(&Q_A, 0.2).unwrap();
        assert_eq!(trajectory.len(), 81);
        session.wait_for_motion(Duration::from_secs(2)).unwrap();
        let q = session.get_joint_positions().unwrap();
        for i in 0..DOF {
            assert_relative_eq!(q[i], Q_A[i], epsilon = 1e-3);
        }
    }

    #[test]
    #[serial]
    fn test_invalid_duration_rejected() {
        let session = session(SimulatedBus::new(), false);
        for tf in [0.0, -2.0] {
            assert!(matches!(
                session.set_joint(&Q_A, tf),
                Err(SessionError::InvalidDuration(_))
            ));
        }
        assert_eq!(session.metrics().unwrap().commands_superseded, 0);
        assert_eq!(session.servo_state().unwrap().mode, ServoMode::Idle);
    }

    #[test]
    #[serial]
    fn test_end_effector_pose_round_trip() {
        let session = session(SimulatedBus::new().with_joint_positions(Q_A), false);
        let pose = session.get_end_effector_pose().unwrap();
        let expected = session.engine().forward(&Q_A);
        assert!(pose.position_distance(&expected) < 1e-3);

        let (position, quaternion) = session.get_end_effector_quaternion().unwrap();
        assert_eq!(position, pose.position);
        let norm: f64 = quaternion.iter().map(|v| v * v).sum();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-9);
    }

    #[test]
    #[serial]
    fn test_gripper_absent() {
        let session = session(SimulatedBus::new(), false);
        assert!(matches!(session.open_gripper(), Err(SessionError::GripperAbsent)));
        assert!(matches!(
            session.get_gripper_position(),
            Err(SessionError::GripperAbsent)
        ));
    }

    #[test]
    #[serial]
    fn test_config_without_calibration_rejected() {
        let bus = SimulatedBus::new();
        let handle = bus.handle();
        let config = ArmConfig {
            calibration: CalibrationPaths::default(),
            ..sim_config()
        };
        assert!(matches!(
            ArmSession::with_adapter(config, bus),
            Err(SessionError::Config(ConfigError::Invalid(msg))) if msg.contains("calibration")
        ));
        assert_eq!(handle.sent_count(), 0);
    }

    #[test]
    #[serial]
    fn test_gravity_compensation_toggle() {
        let session = session(SimulatedBus::new(), false);
        assert!(session.engine().calibration().is_some());
        session.gravity_compensation(true).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(session.servo_state().unwrap().gravity_compensation);
        session.gravity_compensation(false).unwrap();
    }

    #[test]
    #[serial]
    fn test_fault_blocks_commands_until_go_home() {
        let bus = SimulatedBus::new().with_joint_positions(Q_A);
        let handle = bus.handle();
        let session = session(bus, true);

        handle.inject(SimFault::BusOff);
        session
            .with_driver(|d| Ok(d.wait_for(Duration::from_secs(2), |s| s.is_faulted())?))
            .unwrap();
        assert!(matches!(
            session.set_joint(&[0.0; DOF], 1.0),
            Err(SessionError::Faulted(FaultReason::Transport(TransportError::BusOff)))
        ));
        assert!(matches!(session.open_gripper(), Err(SessionError::Faulted(_))));

        handle.recover_bus();
        let trajectory = session.go_home().unwrap();
        assert_eq!(trajectory.final_positions(), HOME_POSE);
        assert!(!session.is_faulted().unwrap());
    }

    #[test]
    #[serial]
    fn test_cleanup_is_idempotent() {
        let bus = SimulatedBus::new();
        let handle = bus.handle();
        let session = session(bus, true);
        session.cleanup();
        session.cleanup();
        assert!(session.is_closed());
        assert!(!handle.is_enabled(startouch_protocol::NodeId::Gripper));
        assert!(matches!(session.get_joint_state(), Err(SessionError::Closed)));
        assert!(matches!(session.go_home(), Err(SessionError::Closed)));
    }

    #[test]
    #[serial]
    fn test_construction_fails_without_feedback() {
        let bus = SimulatedBus::new();
        bus.handle().set_silent(true);
        let config = ArmConfig {
            startup_timeout_ms: 20,
            ..sim_config()
        };
        assert!(matches!(
            ArmSession::with_adapter(config, bus),
            Err(SessionError::Driver(_))
        ));
    }

    #[test]
    #[serial]
    fn test_missing_calibration_is_fatal() {
        let config = ArmConfig::new("sim0", CalibrationPaths::in_dir("/nonexistent"));
        assert!(matches!(
            ArmSession::with_adapter(config, SimulatedBus::new()),
            Err(SessionError::Calibration(_))
        ));
    }
}
