//! 夹爪控制器
//!
//! 对外使用归一化开度 `p ∈ [0, 1]`（0 = 闭合，1 = 张开），电机侧角度映射为
//! `angle = closed_angle + p·(open_angle − closed_angle)`。
//!
//! - `Planned`：从当前测量开度按三次曲线运动到目标，时长由距离 / 速度决定（不短于 `min_duration`）
//! - `Raw`：直接下发目标

use crate::error::DriverError;
use crate::state::{GripperMode, GripperState};
use crate::trajectory::cubic_scaling;
use startouch_protocol::{MotorCommand, MotorFeedback, MotorStatus};
use std::time::Instant;
use tracing::{debug, warn};

/// 夹爪参数
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GripperConfig {
    /// 闭合位置对应的电机角度（rad）
    pub closed_angle: f64,
    /// 张开位置对应的电机角度（rad）
    pub open_angle: f64,
    /// 规划速度（归一化开度 / s）
    pub speed: f64,
    /// 规划最短时长（s）
    pub min_duration: f64,
    /// 低于该开度时告警并计数（不修改目标）
    pub near_zero_threshold: f64,
    pub kp: f64,
    pub kd: f64,
}

impl Default for GripperConfig {
    fn default() -> Self {
        Self {
            closed_angle: 0.0,
            open_angle: 1.8,
            speed: 1.0,
            min_duration: 0.2,
            near_zero_threshold: 0.02,
            kp: 10.0,
            kd: 0.5,
        }
    }
}

impl GripperConfig {
    /// 校验参数
    pub fn validate(&self) -> Result<(), String> {
        if !self.closed_angle.is_finite() || !self.open_angle.is_finite() {
            return Err("gripper angles must be finite".to_string());
        }
        if self.closed_angle == self.open_angle {
            return Err("gripper open_angle must differ from closed_angle".to_string());
        }
        if !(self.speed > 0.0 && self.speed.is_finite()) {
            return Err(format!("gripper speed must be positive, got {}", self.speed));
        }
        if !(self.min_duration > 0.0 && self.min_duration.is_finite()) {
            return Err(format!(
                "gripper min_duration must be positive, got {}",
                self.min_duration
            ));
        }
        if !(0.0..1.0).contains(&self.near_zero_threshold) {
            return Err(format!(
                "gripper near_zero_threshold must be in [0, 1), got {}",
                self.near_zero_threshold
            ));
        }
        if !(0.0..=startouch_protocol::KP_MAX).contains(&self.kp)
            || !(0.0..=startouch_protocol::KD_MAX).contains(&self.kd)
        {
            return Err("gripper gains out of range".to_string());
        }
        Ok(())
    }

    /// 开度 → 电机角度
    pub fn to_angle(&self, position: f64) -> f64 {
        let angle = self.closed_angle + position * (self.open_angle - self.closed_angle);
        let (low, high) = self.angle_range();
        angle.clamp(low, high)
    }

    /// 电机角度 → 开度（截断到 `[0, 1]`）
    pub fn from_angle(&self, angle: f64) -> f64 {
        ((angle - self.closed_angle) / (self.open_angle - self.closed_angle)).clamp(0.0, 1.0)
    }

    fn angle_range(&self) -> (f64, f64) {
        (
            self.closed_angle.min(self.open_angle),
            self.closed_angle.max(self.open_angle),
        )
    }
}

/// 校验后的夹爪目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripperTarget {
    /// 截断到 `[0, 1]` 后的开度
    pub position: f64,
    /// 输入是否被截断
    pub clamped: bool,
    /// 是否低于 `near_zero_threshold`
    pub near_zero: bool,
}

/// 校验夹爪目标
///
/// 超出 `[0, 1]` 的输入被截断并告警；NaN 被拒绝。
///
/// # 错误
/// - `DriverError::InvalidPosition`: 输入为 NaN
pub fn validate_position(position: f64, config: &GripperConfig) -> Result<GripperTarget, DriverError> {
    if position.is_nan() {
        return Err(DriverError::InvalidPosition(position));
    }
    let clamped_position = position.clamp(0.0, 1.0);
    let clamped = clamped_position != position;
    if clamped {
        warn!(
            "Gripper position {} out of [0, 1], clamped to {}",
            position, clamped_position
        );
    }
    let near_zero = clamped_position < config.near_zero_threshold;
    if near_zero {
        warn!(
            "Gripper position {:.4} is below near-zero threshold {}",
            clamped_position, config.near_zero_threshold
        );
    }
    Ok(GripperTarget {
        position: clamped_position,
        clamped,
        near_zero,
    })
}

/// 夹爪指令（开度已校验）
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GripperCommand {
    Planned(f64),
    Raw(f64),
}

#[derive(Debug, Clone, Copy)]
struct GripperPlan {
    start: f64,
    end: f64,
    duration: f64,
    started: Instant,
}

/// 夹爪控制器（运行在控制线程）
#[derive(Debug, Clone)]
pub struct GripperController {
    config: GripperConfig,
    mode: GripperMode,
    target: f64,
    measured: f64,
    status: MotorStatus,
    plan: Option<GripperPlan>,
}

impl GripperController {
    /// 创建控制器，保持当前测量开度
    pub fn new(config: GripperConfig, measured_angle: f64) -> Self {
        let measured = config.from_angle(measured_angle);
        Self {
            config,
            mode: GripperMode::Planned,
            target: measured,
            measured,
            status: MotorStatus::default(),
            plan: None,
        }
    }

    pub fn config(&self) -> &GripperConfig {
        &self.config
    }

    /// 应用新指令（覆盖正在执行的规划）
    pub fn apply(&mut self, command: GripperCommand, now: Instant) {
        match command {
            GripperCommand::Planned(end) => {
                let start = self.measured;
                let duration = ((end - start).abs() / self.config.speed).max(self.config.min_duration);
                debug!(
                    "Gripper planned move {:.3} -> {:.3} over {:.3}s",
                    start, end, duration
                );
                self.mode = GripperMode::Planned;
                self.target = end;
                self.plan = Some(GripperPlan {
                    start,
                    end,
                    duration,
                    started: now,
                });
            },
            GripperCommand::Raw(position) => {
                self.mode = GripperMode::Raw;
                self.target = position;
                self.plan = None;
            },
        }
    }

    /// 更新测量值
    pub fn update_feedback(&mut self, feedback: &MotorFeedback) {
        self.measured = self.config.from_angle(feedback.position);
        self.status = feedback.status;
    }

    /// 回到保持当前测量开度（故障恢复后调用）
    pub fn reset(&mut self) {
        self.plan = None;
        self.target = self.measured;
    }

    /// 本周期电机指令
    pub fn command(&mut self, now: Instant) -> MotorCommand {
        let span = self.config.open_angle - self.config.closed_angle;
        let (position, velocity) = match self.plan {
            Some(plan) => {
                let elapsed = now.saturating_duration_since(plan.started).as_secs_f64();
                let tau = elapsed / plan.duration;
                if tau >= 1.0 {
                    self.plan = None;
                    (plan.end, 0.0)
                } else {
                    let (s, ds) = cubic_scaling(tau);
                    let delta = plan.end - plan.start;
                    (plan.start + delta * s, delta * ds / plan.duration)
                }
            },
            None => (self.target, 0.0),
        };
        MotorCommand::new(
            self.config.to_angle(position),
            velocity * span,
            self.config.kp,
            self.config.kd,
            0.0,
        )
    }

    pub fn state(&self) -> GripperState {
        GripperState {
            position: self.measured,
            target: self.target,
            mode: self.mode,
            tracking: self.plan.is_some(),
            status: self.status,
        }
    }
}
