//! 姿态表示与转换
//!
//! 欧拉角采用 ZYX 顺序：`R = Rz(yaw)·Ry(pitch)·Rx(roll)`，以 `[roll, pitch, yaw]` 存储，
//! 与 [`UnitQuaternion::from_euler_angles`] / [`UnitQuaternion::euler_angles`] 一致。
//! 对外四元数顺序为 `[w, x, y, z]`，转换前先归一化。
//!
//! pitch = ±90° 处存在万向节锁：roll 与 yaw 合并，只保证旋转等价。

use crate::error::KinematicsError;
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};
use std::f64::consts::{PI, TAU};

/// 两端夹角的正弦低于此值时不做球面插值，直接返回起点
const SLERP_EPSILON: f64 = 1e-12;

/// `[w, x, y, z]` 转单位四元数
///
/// # 错误
/// - `KinematicsError::InvalidQuaternion`: 范数为零或包含非有限值
pub fn unit_quaternion(q: [f64; 4]) -> Result<UnitQuaternion<f64>, KinematicsError> {
    let raw = Quaternion::new(q[0], q[1], q[2], q[3]);
    let norm = raw.norm();
    if !norm.is_finite() || norm < f64::EPSILON {
        return Err(KinematicsError::InvalidQuaternion { norm });
    }
    Ok(UnitQuaternion::from_quaternion(raw))
}

/// 单位四元数转 `[w, x, y, z]`
pub fn quaternion_wxyz(q: &UnitQuaternion<f64>) -> [f64; 4] {
    [q.w, q.i, q.j, q.k]
}

/// 归一化四元数 `[w, x, y, z]`
///
/// # 错误
/// - `KinematicsError::InvalidQuaternion`: 范数为零或包含非有限值
pub fn normalize_quaternion(q: [f64; 4]) -> Result<[f64; 4], KinematicsError> {
    unit_quaternion(q).map(|unit| quaternion_wxyz(&unit))
}

/// 四元数 `[w, x, y, z]` 转欧拉角 `[roll, pitch, yaw]`
///
/// # 错误
/// - `KinematicsError::InvalidQuaternion`: 零范数四元数
///
/// # 示例
///
/// ```
/// use startouch_kinematics::quaternion_to_euler;
///
/// let rpy = quaternion_to_euler([1.0, 0.0, 0.0, 0.0]).unwrap();
/// assert_eq!(rpy, [0.0, 0.0, 0.0]);
/// ```
pub fn quaternion_to_euler(q: [f64; 4]) -> Result<[f64; 3], KinematicsError> {
    Ok(unit_to_euler(&unit_quaternion(q)?))
}

/// 四元数 `[x, y, z, w]` 转欧拉角（部分上游数据源使用标量在后的顺序）
pub fn quaternion_xyzw_to_euler(q: [f64; 4]) -> Result<[f64; 3], KinematicsError> {
    quaternion_to_euler([q[3], q[0], q[1], q[2]])
}

fn unit_to_euler(q: &UnitQuaternion<f64>) -> [f64; 3] {
    let (roll, pitch, yaw) = q.euler_angles();
    [roll, pitch, yaw]
}

/// 将角度归一化到 `(-π, π]`
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// 欧拉角转四元数 `[w, x, y, z]`
pub fn euler_to_quaternion(roll: f64, pitch: f64, yaw: f64) -> [f64; 4] {
    quaternion_wxyz(&UnitQuaternion::from_euler_angles(roll, pitch, yaw))
}

/// 球面线性插值（`[w, x, y, z]`，`t ∈ [0, 1]`）
///
/// 沿最短弧插值；两端几乎重合时返回起点。
pub fn slerp(q0: [f64; 4], q1: [f64; 4], t: f64) -> [f64; 4] {
    let t = t.clamp(0.0, 1.0);
    let (Ok(a), Ok(b)) = (unit_quaternion(q0), unit_quaternion(q1)) else {
        return q0;
    };
    let blended = a.try_slerp(&b, t, SLERP_EPSILON).unwrap_or(a);
    quaternion_wxyz(&blended)
}

/// 末端位姿：位置（m）+ 欧拉角（rad）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pose {
    /// `[x, y, z]`
    pub position: [f64; 3],
    /// `[roll, pitch, yaw]`
    pub euler: [f64; 3],
}

impl Pose {
    pub fn new(position: [f64; 3], euler: [f64; 3]) -> Self {
        Self { position, euler }
    }

    /// 由位置和四元数 `[w, x, y, z]` 构造
    pub fn from_quaternion(position: [f64; 3], q: [f64; 4]) -> Result<Self, KinematicsError> {
        Ok(Self {
            position,
            euler: quaternion_to_euler(q)?,
        })
    }

    /// 姿态四元数 `[w, x, y, z]`
    pub fn quaternion(&self) -> [f64; 4] {
        let [roll, pitch, yaw] = self.euler;
        euler_to_quaternion(roll, pitch, yaw)
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        let [roll, pitch, yaw] = self.euler;
        UnitQuaternion::from_euler_angles(roll, pitch, yaw)
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        let [x, y, z] = self.position;
        Isometry3::from_parts(Translation3::new(x, y, z), self.rotation())
    }

    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        let t = &iso.translation.vector;
        Self {
            position: [t.x, t.y, t.z],
            euler: unit_to_euler(&iso.rotation),
        }
    }

    /// 位置与姿态是否全部为有限值
    pub fn is_finite(&self) -> bool {
        self.position.iter().chain(&self.euler).all(|v| v.is_finite())
    }

    /// 位置距离（m）
    pub fn position_distance(&self, other: &Pose) -> f64 {
        self.position
            .iter()
            .zip(&other.position)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}
