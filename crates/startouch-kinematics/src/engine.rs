//! 运动学引擎
//!
//! 组合几何、逆解参数与标定数据，对上层提供正逆解、雅可比和前馈力矩。

use crate::calibration::{CalibrationSet, PARAMS_PER_LINK, STANDARD_PARAM_COUNT};
use crate::dh::ArmGeometry;
use crate::error::KinematicsError;
use crate::ik::{self, IkConfig};
use crate::orientation::Pose;
use crate::{DOF, GRAVITY, JointAngles};
use nalgebra::{Isometry3, Matrix6, SMatrix, Vector3};
use std::sync::Arc;

/// 重力回归矩阵 `Y_g`（`N × 10N`，定长）
pub type GravityRegressor = SMatrix<f64, DOF, STANDARD_PARAM_COUNT>;

/// 库仑摩擦平滑速度（rad/s），`fc·tanh(dq/ε)` 中的 ε
pub const FRICTION_SMOOTHING: f64 = 0.02;

/// 运动学引擎
///
/// # 示例
///
/// ```
/// use startouch_kinematics::{ArmGeometry, IkConfig, KinematicsEngine};
///
/// let engine = KinematicsEngine::new(ArmGeometry::startouch(), IkConfig::default());
/// let pose = engine.forward(&[0.0; 6]);
/// let q = engine.inverse(&pose, &[0.05; 6]).unwrap();
/// assert!(q.iter().all(|v| v.abs() < 1e-3));
/// ```
#[derive(Debug, Clone)]
pub struct KinematicsEngine {
    geometry: ArmGeometry,
    ik: IkConfig,
    calibration: Option<Arc<CalibrationSet>>,
}

impl KinematicsEngine {
    pub fn new(geometry: ArmGeometry, ik: IkConfig) -> Self {
        Self {
            geometry,
            ik,
            calibration: None,
        }
    }

    /// 附加标定数据（启用重力补偿与摩擦前馈）
    pub fn with_calibration(mut self, calibration: Arc<CalibrationSet>) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn geometry(&self) -> &ArmGeometry {
        &self.geometry
    }

    pub fn ik_config(&self) -> &IkConfig {
        &self.ik
    }

    pub fn calibration(&self) -> Option<&Arc<CalibrationSet>> {
        self.calibration.as_ref()
    }

    /// 正解
    pub fn forward(&self, q: &JointAngles) -> Pose {
        Pose::from_isometry(&self.geometry.forward(q))
    }

    pub fn forward_isometry(&self, q: &JointAngles) -> Isometry3<f64> {
        self.geometry.forward(q)
    }

    /// 几何雅可比（6×6，线速度在前）
    pub fn jacobian(&self, q: &JointAngles) -> Matrix6<f64> {
        ik::geometric_jacobian(&self.geometry, q)
    }

    /// 逆解（多候选，选取离 `seed` 最近的解）
    pub fn inverse(&self, pose: &Pose, seed: &JointAngles) -> Result<JointAngles, KinematicsError> {
        if !pose.is_finite() {
            return Err(KinematicsError::NonFinite("target pose"));
        }
        ik::solve(&self.geometry, &self.ik, &pose.to_isometry(), seed)
    }

    /// 逆解（只从 `seed` 出发）
    pub fn inverse_local(
        &self,
        pose: &Pose,
        seed: &JointAngles,
    ) -> Result<JointAngles, KinematicsError> {
        if !pose.is_finite() {
            return Err(KinematicsError::NonFinite("target pose"));
        }
        ik::solve_local(&self.geometry, &self.ik, &pose.to_isometry(), seed)
    }

    /// 重力回归矩阵 `Y_g(q)`（`N × 10N`）
    ///
    /// 只有一阶矩 `[mX, mY, mZ]` 与质量 `m` 列非零：
    ///
    /// - `Y[i, 10j+6+k] = −gᵀ (z_{i−1} × R_j e_k)`
    /// - `Y[i, 10j+9]   = −gᵀ (z_{i−1} × (p_j − p_{i−1}))`
    ///
    /// 其中 `j ≥ i`，`z_{i−1}` / `p_{i−1}` 为关节 i 的转轴方向与轴上一点。
    pub fn gravity_regressor(&self, q: &JointAngles) -> GravityRegressor {
        let frames = self.geometry.frames(q);
        let g = Vector3::new(0.0, 0.0, -GRAVITY);
        let mut regressor = GravityRegressor::zeros();

        for i in 0..DOF {
            let axis = frames[i].rotation * Vector3::z();
            let origin = frames[i].translation.vector;
            for j in i..DOF {
                let body = &frames[j + 1];
                let col = PARAMS_PER_LINK * j;
                for k in 0..3 {
                    let r_k = body.rotation * Vector3::ith(k, 1.0);
                    regressor[(i, col + 6 + k)] = -g.dot(&axis.cross(&r_k));
                }
                let lever = body.translation.vector - origin;
                regressor[(i, col + 9)] = -g.dot(&axis.cross(&lever));
            }
        }
        regressor
    }

    /// 重力补偿力矩 `τ_g = (Y_g · P)[:, 0..n_b] · pi_b`（无标定数据时为零）
    pub fn gravity_torque(&self, q: &JointAngles) -> JointAngles {
        let Some(calibration) = &self.calibration else {
            return [0.0; DOF];
        };
        let tau = self.gravity_regressor(q) * calibration.effective_parameters();
        std::array::from_fn(|i| tau[i])
    }

    /// 摩擦前馈 `fc·tanh(dq/ε) + fv·dq + offset`（无标定数据时为零）
    pub fn friction_torque(&self, dq: &JointAngles) -> JointAngles {
        let Some(calibration) = &self.calibration else {
            return [0.0; DOF];
        };
        let friction = calibration.friction();
        std::array::from_fn(|i| {
            let f = &friction[i];
            f.fc * (dq[i] / FRICTION_SMOOTHING).tanh() + f.fv * dq[i] + f.offset
        })
    }
}
