//! Trajectory Planner - 轨迹规划器
//!
//! 三次时间缩放（起止速度为 0 的最低阶多项式）：
//!
//! ```text
//! s(τ)   = 3τ² − 2τ³,            τ = t / tf ∈ [0, 1]
//! ds/dt  = (6τ − 6τ²) / tf
//! ```
//!
//! - 关节空间：`q(t) = q0 + (q1 − q0)·s`
//! - 笛卡尔空间：位置按 `s` 线性插值，姿态按 `s` 球面插值，逐点逆解
//!   （以上一点为初值），速度取中心差分
//!
//! 采样点数为 `round(tf·ctrl_hz) + 1`，第 k 点时间为 `k·tf/(count−1)`。
//! 控制线程按实际经过时间线性插值取点，因此控制频率与规划频率可以不同。

use crate::error::PlanError;
use startouch_kinematics::{DOF, JointAngles, KinematicsEngine, Pose, slerp};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// 相邻采样点之间允许的最大关节增量（rad）
pub const DEFAULT_MAX_JOINT_STEP: f64 = 0.2;

/// 单条轨迹的最大采样点数（400 Hz 下约 41 分钟）
pub const MAX_TRAJECTORY_SAMPLES: usize = 1_000_000;

static NEXT_TRAJECTORY_ID: AtomicU64 = AtomicU64::new(1);

/// 轨迹采样点
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrajectorySample {
    /// 相对轨迹起点的时间（s）
    pub time: f64,
    pub positions: JointAngles,
    pub velocities: JointAngles,
}

/// 已采样的关节轨迹
///
/// 时间单调递增，覆盖 `[0, duration]`；每条轨迹有进程内唯一的 ID。
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    id: u64,
    rate_hz: f64,
    duration: f64,
    samples: Vec<TrajectorySample>,
}

impl Trajectory {
    fn from_samples(samples: Vec<TrajectorySample>, rate_hz: f64, duration: f64) -> Self {
        Self {
            id: NEXT_TRAJECTORY_ID.fetch_add(1, Ordering::Relaxed),
            rate_hz,
            duration,
            samples,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 采样频率（Hz）
    pub fn rate_hz(&self) -> f64 {
        self.rate_hz
    }

    /// 时长（s）
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&TrajectorySample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&TrajectorySample> {
        self.samples.last()
    }

    /// 终点关节角
    pub fn final_positions(&self) -> JointAngles {
        self.samples.last().map(|s| s.positions).unwrap_or([0.0; DOF])
    }

    /// 查询时刻 `t` 的位置与速度（相邻采样点线性插值，`t` 截断到 `[0, duration]`）
    pub fn sample_at(&self, t: f64) -> (JointAngles, JointAngles) {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return ([0.0; DOF], [0.0; DOF]);
        };
        if t.is_nan() || t <= 0.0 {
            return (first.positions, first.velocities);
        }
        if t >= self.duration || self.samples.len() == 1 {
            return (last.positions, last.velocities);
        }

        let dt = self.duration / (self.samples.len() - 1) as f64;
        let index = ((t / dt).floor() as usize).min(self.samples.len() - 2);
        let a = &self.samples[index];
        let b = &self.samples[index + 1];
        let alpha = ((t - a.time) / (b.time - a.time)).clamp(0.0, 1.0);

        let lerp = |x: &JointAngles, y: &JointAngles| -> JointAngles {
            std::array::from_fn(|i| x[i] + (y[i] - x[i]) * alpha)
        };
        (
            lerp(&a.positions, &b.positions),
            lerp(&a.velocities, &b.velocities),
        )
    }

    /// 时刻 `t` 是否已到达终点
    pub fn is_finished(&self, t: f64) -> bool {
        t >= self.duration
    }
}

/// 三次时间缩放：返回 `(s, ds/dτ)`
pub(crate) fn cubic_scaling(tau: f64) -> (f64, f64) {
    let tau = tau.clamp(0.0, 1.0);
    let s = tau * tau * (3.0 - 2.0 * tau);
    let ds = 6.0 * tau * (1.0 - tau);
    (s, ds)
}

/// 校验时长与频率，返回采样点数
///
/// # 错误
/// - `PlanError::InvalidFrequency`: `ctrl_hz <= 0` 或非有限
/// - `PlanError::InvalidDuration`: `tf <= 0`、非有限，`tf·ctrl_hz < 0.5`（不足一个控制周期），
///   或采样点数超过 [`MAX_TRAJECTORY_SAMPLES`]
pub fn sample_count(tf: f64, ctrl_hz: f64) -> Result<usize, PlanError> {
    if !ctrl_hz.is_finite() || ctrl_hz <= 0.0 {
        return Err(PlanError::InvalidFrequency(ctrl_hz));
    }
    let periods = tf * ctrl_hz;
    if !tf.is_finite() || tf <= 0.0 || !periods.is_finite() || periods < 0.5 {
        return Err(PlanError::InvalidDuration(tf));
    }
    // 先在浮点域比较，避免 `as usize` 饱和
    let periods = periods.round();
    if periods >= MAX_TRAJECTORY_SAMPLES as f64 {
        return Err(PlanError::InvalidDuration(tf));
    }
    (periods as usize)
        .checked_add(1)
        .filter(|&count| count <= MAX_TRAJECTORY_SAMPLES)
        .ok_or(PlanError::InvalidDuration(tf))
}

/// 关节空间三次轨迹
///
/// # 参数
///
/// - `q_start`: 起点关节角（rad）
/// - `q_end`: 终点关节角（rad）
/// - `tf`: 时长（s）
/// - `ctrl_hz`: 采样频率（Hz）
///
/// # 示例
///
/// ```rust
/// use startouch_driver::trajectory::plan_joint;
///
/// let trajectory = plan_joint(&[0.0; 6], &[0.5; 6], 3.0, 400.0).unwrap();
/// assert_eq!(trajectory.len(), 1201);
/// assert_eq!(trajectory.last().unwrap().positions, [0.5; 6]);
/// assert_eq!(trajectory.last().unwrap().velocities, [0.0; 6]);
/// ```
pub fn plan_joint(
    q_start: &JointAngles,
    q_end: &JointAngles,
    tf: f64,
    ctrl_hz: f64,
) -> Result<Trajectory, PlanError> {
    let count = sample_count(tf, ctrl_hz)?;
    if q_start.iter().chain(q_end).any(|v| !v.is_finite()) {
        return Err(PlanError::NonFiniteTarget);
    }

    let delta: JointAngles = std::array::from_fn(|i| q_end[i] - q_start[i]);
    let last = count - 1;
    let samples = (0..count)
        .map(|k| {
            let time = tf * k as f64 / last as f64;
            if k == last {
                return TrajectorySample {
                    time: tf,
                    positions: *q_end,
                    velocities: [0.0; DOF],
                };
            }
            let (s, ds) = cubic_scaling(k as f64 / last as f64);
            TrajectorySample {
                time,
                positions: std::array::from_fn(|i| q_start[i] + delta[i] * s),
                velocities: std::array::from_fn(|i| delta[i] * ds / tf),
            }
        })
        .collect();

    let trajectory = Trajectory::from_samples(samples, ctrl_hz, tf);
    debug!(
        "Planned joint trajectory #{} ({} samples, {:.3}s)",
        trajectory.id,
        trajectory.len(),
        tf
    );
    Ok(trajectory)
}

/// 关节 / 笛卡尔轨迹规划器
#[derive(Debug, Clone)]
pub struct TrajectoryPlanner {
    engine: Arc<KinematicsEngine>,
    max_joint_step: f64,
}

impl TrajectoryPlanner {
    pub fn new(engine: Arc<KinematicsEngine>) -> Self {
        Self {
            engine,
            max_joint_step: DEFAULT_MAX_JOINT_STEP,
        }
    }

    /// 设置相邻采样点允许的最大关节增量
    pub fn with_max_joint_step(mut self, max_joint_step: f64) -> Self {
        self.max_joint_step = max_joint_step;
        self
    }

    pub fn engine(&self) -> &Arc<KinematicsEngine> {
        &self.engine
    }

    pub fn max_joint_step(&self) -> f64 {
        self.max_joint_step
    }

    /// 关节空间轨迹，见 [`plan_joint`]
    pub fn plan_joint(
        &self,
        q_start: &JointAngles,
        q_end: &JointAngles,
        tf: f64,
        ctrl_hz: f64,
    ) -> Result<Trajectory, PlanError> {
        plan_joint(q_start, q_end, tf, ctrl_hz)
    }

    /// 笛卡尔直线轨迹
    ///
    /// 先对目标位姿求逆解（失败立即返回），再逐点求解中间位姿；
    /// 最后一个点为目标逆解，速度为中心差分，首尾速度为 0。
    ///
    /// # 参数
    ///
    /// - `pose_start`: 起点位姿（通常为当前测量位姿）
    /// - `pose_end`: 目标位姿
    /// - `tf`, `ctrl_hz`: 同 [`plan_joint`]
    /// - `seed`: 当前关节角，作为逆解初值
    ///
    /// # 错误
    ///
    /// - `PlanError::InvalidDuration` / `PlanError::InvalidFrequency`
    /// - `PlanError::Kinematics`: 目标或中间点不可达 / 接近奇异
    /// - `PlanError::Discontinuous`: 相邻点关节跳变超过 `max_joint_step`
    pub fn plan_pose(
        &self,
        pose_start: &Pose,
        pose_end: &Pose,
        tf: f64,
        ctrl_hz: f64,
        seed: &JointAngles,
    ) -> Result<Trajectory, PlanError> {
        let count = sample_count(tf, ctrl_hz)?;
        if seed.iter().any(|v| !v.is_finite()) {
            return Err(PlanError::NonFiniteTarget);
        }
        let q_goal = self.engine.inverse(pose_end, seed)?;
        let q_first = self.engine.inverse_local(pose_start, seed)?;

        let quat_start = pose_start.quaternion();
        let quat_end = pose_end.quaternion();
        let last = count - 1;

        let mut positions: Vec<JointAngles> = Vec::with_capacity(count);
        positions.push(q_first);
        for k in 1..count {
            let q = if k == last {
                q_goal
            } else {
                let (s, _) = cubic_scaling(k as f64 / last as f64);
                let position: [f64; 3] = std::array::from_fn(|i| {
                    pose_start.position[i] + (pose_end.position[i] - pose_start.position[i]) * s
                });
                let pose = Pose::from_quaternion(position, slerp(quat_start, quat_end, s))?;
                self.engine.inverse_local(&pose, &positions[k - 1])?
            };
            self.check_step(k, &positions[k - 1], &q)?;
            positions.push(q);
        }

        let dt = tf / last as f64;
        let samples = positions
            .iter()
            .enumerate()
            .map(|(k, q)| {
                let velocities = if k == 0 || k == last {
                    [0.0; DOF]
                } else {
                    let prev = &positions[k - 1];
                    let next = &positions[k + 1];
                    std::array::from_fn(|i| (next[i] - prev[i]) / (2.0 * dt))
                };
                TrajectorySample {
                    time: if k == last { tf } else { dt * k as f64 },
                    positions: *q,
                    velocities,
                }
            })
            .collect();

        let trajectory = Trajectory::from_samples(samples, ctrl_hz, tf);
        debug!(
            "Planned Cartesian trajectory #{} ({} samples, {:.3}s)",
            trajectory.id,
            trajectory.len(),
            tf
        );
        Ok(trajectory)
    }

    fn check_step(&self, sample: usize, prev: &JointAngles, next: &JointAngles) -> Result<(), PlanError> {
        for joint in 0..DOF {
            let step = (next[joint] - prev[joint]).abs();
            if step > self.max_joint_step {
                return Err(PlanError::Discontinuous {
                    sample,
                    joint,
                    step,
                });
            }
        }
        Ok(())
    }
}
