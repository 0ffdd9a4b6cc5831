//! 逆运动学（阻尼最小二乘）
//!
//! 迭代：`Δq = Jᵀ (J Jᵀ + λ² I)⁻¹ e`，`e = [Δp; log(R_target · Rᵀ)]`。
//!
//! 多解策略：从调用方给定的初值以及一组固定的翻转初值（腕部翻转、肩部翻转）分别求解，
//! 丢弃未收敛或超出关节限位的候选，选取与初值加权距离最小的解。
//! 整个过程不含随机性，相同输入总得到相同结果。

use crate::dh::ArmGeometry;
use crate::error::KinematicsError;
use crate::orientation::wrap_angle;
use crate::{DOF, JointAngles};
use nalgebra::{Isometry3, Matrix6, Vector3, Vector6};
use std::f64::consts::{PI, TAU};
use tracing::trace;

/// 逆解参数
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IkConfig {
    /// 单个候选的最大迭代次数
    pub max_iterations: usize,
    /// 位置收敛阈值（m）
    pub position_tolerance: f64,
    /// 姿态收敛阈值（rad）
    pub orientation_tolerance: f64,
    /// 阻尼系数 λ
    pub damping: f64,
    /// 单步最大关节增量范数（rad）
    pub max_step: f64,
    /// 雅可比最小奇异值下限
    pub singular_threshold: f64,
    /// 候选解选择时各关节的距离权重
    pub joint_weights: [f64; DOF],
}

impl Default for IkConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            position_tolerance: 1e-5,
            orientation_tolerance: 1e-4,
            damping: 0.005,
            max_step: 0.3,
            singular_threshold: 1e-3,
            joint_weights: [1.0; DOF],
        }
    }
}

impl IkConfig {
    pub fn is_valid(&self) -> bool {
        self.max_iterations > 0
            && self.position_tolerance > 0.0
            && self.orientation_tolerance > 0.0
            && self.damping >= 0.0
            && self.max_step > 0.0
            && self.singular_threshold >= 0.0
            && self.joint_weights.iter().all(|w| w.is_finite() && *w >= 0.0)
    }
}

/// 几何雅可比（前三行为线速度，后三行为角速度）
pub fn geometric_jacobian(geometry: &ArmGeometry, q: &JointAngles) -> Matrix6<f64> {
    let frames = geometry.frames(q);
    let tcp = geometry.tool_pose(&frames[DOF]).translation.vector;
    let mut jacobian = Matrix6::zeros();
    for i in 0..DOF {
        let z: Vector3<f64> = frames[i].rotation * Vector3::z();
        let p = frames[i].translation.vector;
        let linear = z.cross(&(tcp - p));
        jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&linear);
        jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&z);
    }
    jacobian
}

/// 雅可比最小奇异值
pub fn sigma_min(jacobian: &Matrix6<f64>) -> f64 {
    jacobian.singular_values().min()
}

/// 位姿误差 `[Δp; Δθ]`
fn pose_error(target: &Isometry3<f64>, current: &Isometry3<f64>) -> Vector6<f64> {
    let dp = target.translation.vector - current.translation.vector;
    let dr = (target.rotation * current.rotation.inverse()).scaled_axis();
    Vector6::new(dp.x, dp.y, dp.z, dr.x, dr.y, dr.z)
}

/// 单个候选的求解结果
#[derive(Debug, Clone, Copy)]
struct Candidate {
    q: JointAngles,
    iterations: usize,
    residual: f64,
    converged: bool,
}

fn run_dls(
    geometry: &ArmGeometry,
    config: &IkConfig,
    target: &Isometry3<f64>,
    seed: &JointAngles,
) -> Candidate {
    let mut q = *seed;
    let lambda_sq = config.damping * config.damping;
    let mut residual = f64::INFINITY;

    for iteration in 0..config.max_iterations {
        let current = geometry.forward(&q);
        let error = pose_error(target, &current);
        let position_error = error.fixed_rows::<3>(0).norm();
        let orientation_error = error.fixed_rows::<3>(3).norm();
        residual = error.norm();

        if position_error < config.position_tolerance
            && orientation_error < config.orientation_tolerance
        {
            return Candidate {
                q,
                iterations: iteration,
                residual,
                converged: true,
            };
        }

        let jacobian = geometric_jacobian(geometry, &q);
        let damped = jacobian * jacobian.transpose() + Matrix6::identity() * lambda_sq;
        let Some(y) = damped
            .cholesky()
            .map(|c| c.solve(&error))
            .or_else(|| damped.lu().solve(&error))
        else {
            break;
        };

        let mut dq = jacobian.transpose() * y;
        let step = dq.norm();
        if step > config.max_step {
            dq *= config.max_step / step;
        }
        for (qi, dqi) in q.iter_mut().zip(dq.iter()) {
            *qi += dqi;
        }
    }

    Candidate {
        q,
        iterations: config.max_iterations,
        residual,
        converged: false,
    }
}

/// 固定的候选初值：原初值、腕部翻转、肩部翻转
pub fn candidate_seeds(seed: &JointAngles) -> [JointAngles; 3] {
    let mut wrist = *seed;
    wrist[3] = wrap_angle(wrist[3] + PI);
    wrist[4] = -wrist[4];
    wrist[5] = wrap_angle(wrist[5] + PI);

    let mut shoulder = *seed;
    shoulder[0] = wrap_angle(shoulder[0] + PI);
    shoulder[1] = -shoulder[1];

    [*seed, wrist, shoulder]
}

/// 将解的每个关节移到限位内、离初值最近的 2π 等价角；无法落入限位时返回 `None`
fn fit_to_limits(
    geometry: &ArmGeometry,
    q: &JointAngles,
    seed: &JointAngles,
) -> Option<JointAngles> {
    let mut fitted = [0.0; DOF];
    for i in 0..DOF {
        let [min, max] = geometry.joint_limits[i];
        let base = seed[i] + wrap_angle(q[i] - seed[i]);
        fitted[i] = [base, base - TAU, base + TAU]
            .into_iter()
            .filter(|v| *v >= min && *v <= max)
            .min_by(|a, b| (a - seed[i]).abs().total_cmp(&(b - seed[i]).abs()))?;
    }
    Some(fitted)
}

fn weighted_distance(config: &IkConfig, a: &JointAngles, b: &JointAngles) -> f64 {
    a.iter()
        .zip(b)
        .zip(&config.joint_weights)
        .map(|((x, y), w)| w * (x - y) * (x - y))
        .sum()
}

fn validate_inputs(target: &Isometry3<f64>, seed: &JointAngles) -> Result<(), KinematicsError> {
    if !seed.iter().all(|v| v.is_finite()) {
        return Err(KinematicsError::NonFinite("seed"));
    }
    let t = &target.translation.vector;
    let r = target.rotation.quaternion();
    if !(t.iter().all(|v| v.is_finite()) && r.coords.iter().all(|v| v.is_finite())) {
        return Err(KinematicsError::NonFinite("target pose"));
    }
    Ok(())
}

fn solve_candidates(
    geometry: &ArmGeometry,
    config: &IkConfig,
    target: &Isometry3<f64>,
    seed: &JointAngles,
    seeds: &[JointAngles],
) -> Result<JointAngles, KinematicsError> {
    validate_inputs(target, seed)?;

    let mut best: Option<(f64, JointAngles)> = None;
    let mut best_residual = f64::INFINITY;
    let mut total_iterations = 0;

    for start in seeds {
        let candidate = run_dls(geometry, config, target, start);
        total_iterations += candidate.iterations;
        best_residual = best_residual.min(candidate.residual);
        if !candidate.converged {
            continue;
        }
        let Some(q) = fit_to_limits(geometry, &candidate.q, seed) else {
            trace!("IK candidate outside joint limits: {:?}", candidate.q);
            continue;
        };
        let distance = weighted_distance(config, &q, seed);
        if best.is_none_or(|(d, _)| distance < d) {
            best = Some((distance, q));
        }
    }

    let Some((_, q)) = best else {
        return Err(KinematicsError::Unreachable {
            iterations: total_iterations,
            residual: best_residual,
        });
    };

    let sigma = sigma_min(&geometric_jacobian(geometry, &q));
    if sigma < config.singular_threshold {
        return Err(KinematicsError::NearSingular { sigma_min: sigma });
    }
    Ok(q)
}

/// 多候选逆解
///
/// # 错误
/// - `KinematicsError::Unreachable`: 没有候选在限位内收敛
/// - `KinematicsError::NearSingular`: 选中解的雅可比最小奇异值低于阈值
/// - `KinematicsError::NonFinite`: 输入包含 NaN / 无穷大
pub fn solve(
    geometry: &ArmGeometry,
    config: &IkConfig,
    target: &Isometry3<f64>,
    seed: &JointAngles,
) -> Result<JointAngles, KinematicsError> {
    solve_candidates(geometry, config, target, seed, &candidate_seeds(seed))
}

/// 仅从给定初值求解（轨迹逐点求解使用，保证解的连续性）
pub fn solve_local(
    geometry: &ArmGeometry,
    config: &IkConfig,
    target: &Isometry3<f64>,
    seed: &JointAngles,
) -> Result<JointAngles, KinematicsError> {
    solve_candidates(geometry, config, target, seed, std::slice::from_ref(seed))
}
