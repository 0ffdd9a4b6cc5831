//! 关节伺服控制器
//!
//! 状态机：
//!
//! ```text
//! Idle ──Track──▶ Tracking ──完成──▶ Idle
//! Idle ──Raw────▶ RawHold ──到位────▶ Idle
//! 任意状态 ──fault()──▶ Fault ──reset()──▶ Idle
//! ```
//!
//! 控制器本身不做 IO：控制线程每个周期调用 [`ServoController::setpoint`] 取得目标，
//! 再由 [`ServoController::motor_commands`] 生成 MIT 指令（叠加前馈力矩）。

use crate::state::{FaultReason, JointState, ServoMode};
use crate::trajectory::Trajectory;
use startouch_kinematics::{DOF, JointAngles};
use startouch_protocol::MotorCommand;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// 伺服参数
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServoConfig {
    /// 位置增益（Nm/rad）
    pub kp: JointAngles,
    /// 速度增益（Nm·s/rad）
    pub kd: JointAngles,
    /// 单周期内发送失败（超时）的最大重试次数
    pub max_send_retries: u32,
    /// 连续无反馈周期数上限，超过即进入故障
    pub max_consecutive_timeouts: u32,
    /// RawHold 到位判定的位置误差（rad）
    pub settle_tolerance: f64,
    /// RawHold 到位判定的速度阈值（rad/s）
    pub settle_velocity: f64,
    /// 是否叠加摩擦前馈（需要标定数据）
    pub friction_feedforward: bool,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            kp: [80.0, 80.0, 80.0, 40.0, 30.0, 30.0],
            kd: [2.0, 2.0, 2.0, 1.0, 0.8, 0.8],
            max_send_retries: 2,
            max_consecutive_timeouts: 5,
            settle_tolerance: 0.01,
            settle_velocity: 0.05,
            friction_feedforward: false,
        }
    }
}

impl ServoConfig {
    /// 校验参数
    pub fn validate(&self) -> Result<(), String> {
        for (i, (kp, kd)) in self.kp.iter().zip(&self.kd).enumerate() {
            if !(0.0..=startouch_protocol::KP_MAX).contains(kp) {
                return Err(format!("kp[{}] = {} out of [0, {}]", i, kp, startouch_protocol::KP_MAX));
            }
            if !(0.0..=startouch_protocol::KD_MAX).contains(kd) {
                return Err(format!("kd[{}] = {} out of [0, {}]", i, kd, startouch_protocol::KD_MAX));
            }
        }
        if self.max_consecutive_timeouts == 0 {
            return Err("max_consecutive_timeouts must be at least 1".to_string());
        }
        if !(self.settle_tolerance > 0.0 && self.settle_velocity > 0.0) {
            return Err("settle tolerances must be positive".to_string());
        }
        Ok(())
    }
}

/// 下发给控制线程的关节指令
#[derive(Debug, Clone)]
pub enum ServoCommand {
    /// 跟踪规划好的轨迹（立即替换当前轨迹）
    Track(Arc<Trajectory>),
    /// 直接设定点：速度只在首个周期下发，之后零速保持
    Raw {
        positions: JointAngles,
        velocities: JointAngles,
    },
}

/// 单周期关节目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub positions: JointAngles,
    pub velocities: JointAngles,
}

#[derive(Debug, Clone)]
enum State {
    Idle,
    Tracking {
        trajectory: Arc<Trajectory>,
        started: Instant,
    },
    RawHold {
        positions: JointAngles,
        velocities: JointAngles,
        dispatched: bool,
    },
    Fault(FaultReason),
}

/// 关节伺服控制器
#[derive(Debug, Clone)]
pub struct ServoController {
    config: ServoConfig,
    state: State,
    /// Idle 时保持的位置
    hold: JointAngles,
    /// 最近一次输出的目标
    last_target: JointAngles,
}

impl ServoController {
    /// 创建控制器，初始保持 `hold`（通常为上电时的测量位置）
    pub fn new(config: ServoConfig, hold: JointAngles) -> Self {
        Self {
            config,
            state: State::Idle,
            hold,
            last_target: hold,
        }
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn mode(&self) -> ServoMode {
        match self.state {
            State::Idle => ServoMode::Idle,
            State::Tracking { .. } => ServoMode::Tracking,
            State::RawHold { .. } => ServoMode::RawHold,
            State::Fault(_) => ServoMode::Fault,
        }
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.state, State::Fault(_))
    }

    pub fn fault_reason(&self) -> Option<&FaultReason> {
        match &self.state {
            State::Fault(reason) => Some(reason),
            _ => None,
        }
    }

    /// 正在跟踪的轨迹 ID
    pub fn trajectory_id(&self) -> Option<u64> {
        match &self.state {
            State::Tracking { trajectory, .. } => Some(trajectory.id()),
            _ => None,
        }
    }

    /// 最近一次输出的关节目标
    pub fn target(&self) -> &JointAngles {
        &self.last_target
    }

    /// 应用新指令
    ///
    /// 故障状态下拒绝任何指令，返回 `false`。
    pub fn apply(&mut self, command: ServoCommand, now: Instant) -> bool {
        if let State::Fault(reason) = &self.state {
            warn!("Servo is faulted ({}), command dropped", reason);
            return false;
        }
        self.state = match command {
            ServoCommand::Track(trajectory) => {
                if let State::Tracking { trajectory: old, .. } = &self.state {
                    debug!("Trajectory #{} replaced by #{}", old.id(), trajectory.id());
                }
                State::Tracking {
                    trajectory,
                    started: now,
                }
            },
            ServoCommand::Raw {
                positions,
                velocities,
            } => State::RawHold {
                positions,
                velocities,
                dispatched: false,
            },
        };
        true
    }

    /// 进入故障状态（已在故障中时保留第一个原因）
    pub fn fault(&mut self, reason: FaultReason) {
        if self.is_faulted() {
            return;
        }
        error!("Servo fault: {}", reason);
        self.state = State::Fault(reason);
    }

    /// 清除故障 / 中止运动，回到 Idle 并保持 `hold`
    pub fn reset(&mut self, hold: JointAngles) {
        self.state = State::Idle;
        self.hold = hold;
        self.last_target = hold;
    }

    /// 计算本周期目标；故障状态返回 `None`（停止下发）
    pub fn setpoint(&mut self, now: Instant, measured: &JointState) -> Option<Setpoint> {
        let setpoint = match &mut self.state {
            State::Fault(_) => return None,
            State::Idle => Setpoint {
                positions: self.hold,
                velocities: [0.0; DOF],
            },
            State::Tracking {
                trajectory,
                started,
            } => {
                let elapsed = now.saturating_duration_since(*started).as_secs_f64();
                let (positions, velocities) = trajectory.sample_at(elapsed);
                if trajectory.is_finished(elapsed) {
                    debug!("Trajectory #{} complete", trajectory.id());
                    self.hold = trajectory.final_positions();
                    self.state = State::Idle;
                    Setpoint {
                        positions: self.hold,
                        velocities: [0.0; DOF],
                    }
                } else {
                    Setpoint {
                        positions,
                        velocities,
                    }
                }
            },
            State::RawHold {
                positions,
                velocities,
                dispatched,
            } => {
                let positions = *positions;
                if !*dispatched {
                    *dispatched = true;
                    Setpoint {
                        positions,
                        velocities: *velocities,
                    }
                } else {
                    if self.settled(&positions, measured) {
                        debug!("Raw setpoint reached, servo idle");
                        self.hold = positions;
                        self.state = State::Idle;
                    }
                    Setpoint {
                        positions,
                        velocities: [0.0; DOF],
                    }
                }
            },
        };
        self.last_target = setpoint.positions;
        Some(setpoint)
    }

    fn settled(&self, target: &JointAngles, measured: &JointState) -> bool {
        measured.is_complete()
            && (0..DOF).all(|i| {
                (measured.positions[i] - target[i]).abs() <= self.config.settle_tolerance
                    && measured.velocities[i].abs() <= self.config.settle_velocity
            })
    }

    /// 生成 MIT 指令：目标位置 + 目标速度 + 增益 + 前馈力矩
    pub fn motor_commands(&self, setpoint: &Setpoint, feedforward: &JointAngles) -> [MotorCommand; DOF] {
        std::array::from_fn(|i| {
            MotorCommand::new(
                setpoint.positions[i],
                setpoint.velocities[i],
                self.config.kp[i],
                self.config.kd[i],
                feedforward[i],
            )
        })
    }
}
