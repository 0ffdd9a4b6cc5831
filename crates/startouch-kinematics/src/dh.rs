//! 标准 DH 参数
//!
//! 单节变换：`T_i = Rz(θ_i + offset_i) · Tz(d_i) · Tx(a_i) · Rx(α_i)`

use crate::{DOF, JointAngles};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use std::f64::consts::FRAC_PI_2;

/// 单节 DH 参数
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DhLink {
    /// 连杆长度（m）
    pub a: f64,
    /// 连杆扭角（rad）
    pub alpha: f64,
    /// 连杆偏距（m）
    pub d: f64,
    /// 关节零位偏置（rad）
    pub theta_offset: f64,
}

impl DhLink {
    pub const fn new(a: f64, alpha: f64, d: f64, theta_offset: f64) -> Self {
        Self {
            a,
            alpha,
            d,
            theta_offset,
        }
    }

    /// 关节角为 `q` 时的连杆变换
    pub fn transform(&self, q: f64) -> Isometry3<f64> {
        let theta = q + self.theta_offset;
        let (st, ct) = theta.sin_cos();
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), theta)
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), self.alpha);
        Isometry3::from_parts(
            Translation3::new(self.a * ct, self.a * st, self.d),
            rotation,
        )
    }
}

/// 臂型几何：6 节 DH 链 + 工具偏移 + 关节限位
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ArmGeometry {
    pub links: [DhLink; DOF],
    /// 工具中心点在第 6 节坐标系下的偏移（m）
    pub tool_offset: [f64; 3],
    /// 关节限位 `[min, max]`（rad）
    pub joint_limits: [[f64; 2]; DOF],
}

impl ArmGeometry {
    /// Startouch 6 轴臂默认几何
    ///
    /// 零位为肘部、腕部弯曲的非奇异位形。
    pub fn startouch() -> Self {
        Self {
            links: [
                DhLink::new(0.0, FRAC_PI_2, 0.12, 0.0),
                DhLink::new(0.26, 0.0, 0.0, FRAC_PI_2),
                DhLink::new(0.0, FRAC_PI_2, 0.0, -std::f64::consts::FRAC_PI_4),
                DhLink::new(0.0, -FRAC_PI_2, 0.25, 0.0),
                DhLink::new(0.0, FRAC_PI_2, 0.0, FRAC_PI_2),
                DhLink::new(0.0, 0.0, 0.09, 0.0),
            ],
            tool_offset: [0.0; 3],
            joint_limits: [
                [-3.0, 3.0],
                [-2.9, 2.9],
                [-2.9, 2.9],
                [-3.0, 3.0],
                [-1.8, 1.8],
                [-3.0, 3.0],
            ],
        }
    }

    /// 各关节坐标系位姿：`frames[0]` 为基座，`frames[i]` 为第 i 节末端
    pub fn frames(&self, q: &JointAngles) -> [Isometry3<f64>; DOF + 1] {
        let mut frames = [Isometry3::identity(); DOF + 1];
        for (i, link) in self.links.iter().enumerate() {
            frames[i + 1] = frames[i] * link.transform(q[i]);
        }
        frames
    }

    /// 工具中心点位姿
    pub fn tool_pose(&self, flange: &Isometry3<f64>) -> Isometry3<f64> {
        let [x, y, z] = self.tool_offset;
        *flange * Translation3::new(x, y, z)
    }

    /// 正解（含工具偏移）
    pub fn forward(&self, q: &JointAngles) -> Isometry3<f64> {
        self.tool_pose(&self.frames(q)[DOF])
    }

    /// 关节角是否在限位内
    pub fn within_limits(&self, q: &JointAngles) -> bool {
        q.iter()
            .zip(&self.joint_limits)
            .all(|(v, [min, max])| *v >= *min && *v <= *max)
    }

    /// 几何参数是否有效（全部有限，限位 `min < max`）
    pub fn is_valid(&self) -> bool {
        let links_finite = self
            .links
            .iter()
            .all(|l| [l.a, l.alpha, l.d, l.theta_offset].iter().all(|v| v.is_finite()));
        let tool_finite = self.tool_offset.iter().all(|v| v.is_finite());
        let limits_ok = self
            .joint_limits
            .iter()
            .all(|[min, max]| min.is_finite() && max.is_finite() && min < max);
        links_finite && tool_finite && limits_ok
    }
}

impl Default for ArmGeometry {
    fn default() -> Self {
        Self::startouch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_link_transform_matches_dh_matrix() {
        let link = DhLink::new(0.3, 0.4, 0.1, 0.2);
        let q = 0.5;
        let iso = link.transform(q);
        let m = iso.to_homogeneous();

        let theta: f64 = q + 0.2;
        let (st, ct) = theta.sin_cos();
        let (sa, ca) = 0.4f64.sin_cos();
        let expected = [
            [ct, -st * ca, st * sa, 0.3 * ct],
            [st, ct * ca, -ct * sa, 0.3 * st],
            [0.0, sa, ca, 0.1],
        ];
        for (r, row) in expected.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                assert_relative_eq!(m[(r, c)], *value, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_zero_pose() {
        let geometry = ArmGeometry::startouch();
        let tcp = geometry.forward(&[0.0; DOF]);
        let t = tcp.translation.vector;
        assert_relative_eq!(t.x, 0.24042, epsilon = 1e-4);
        assert_relative_eq!(t.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(t.z, 0.26686, epsilon = 1e-4);
    }

    #[test]
    fn test_base_joint_rotates_about_z() {
        let geometry = ArmGeometry::startouch();
        let p0 = geometry.forward(&[0.0; DOF]).translation.vector;
        let p1 = geometry
            .forward(&[FRAC_PI_2, 0.0, 0.0, 0.0, 0.0, 0.0])
            .translation
            .vector;
        // 绕竖直轴旋转 90°：(x, y) → (-y, x)，高度不变
        assert_relative_eq!(p1.x, -p0.y, epsilon = 1e-9);
        assert_relative_eq!(p1.y, p0.x, epsilon = 1e-9);
        assert_relative_eq!(p1.z, p0.z, epsilon = 1e-9);
    }

    #[test]
    fn test_tool_offset_applied_in_flange_frame() {
        let mut geometry = ArmGeometry::startouch();
        let flange = geometry.forward(&[0.0; DOF]);
        geometry.tool_offset = [0.0, 0.0, 0.1];
        let tcp = geometry.forward(&[0.0; DOF]);
        let expected = flange * nalgebra::Point3::new(0.0, 0.0, 0.1);
        assert_relative_eq!(tcp.translation.vector, expected.coords, epsilon = 1e-12);
    }

    #[test]
    fn test_limits() {
        let geometry = ArmGeometry::startouch();
        assert!(geometry.is_valid());
        assert!(geometry.within_limits(&[0.0; DOF]));
        assert!(!geometry.within_limits(&[0.0, 0.0, 0.0, 0.0, 2.0, 0.0]));

        let mut bad = geometry.clone();
        bad.joint_limits[2] = [1.0, -1.0];
        assert!(!bad.is_valid());
    }
}
