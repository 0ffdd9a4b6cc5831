//! 输入验证模块
//!
//! 解析并校验命令行给出的关节角、位置、姿态

use startouch_sdk::kinematics::{ArmGeometry, DOF, JointAngles};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum InputError {
    #[error("期望 {expected} 个数值，得到 {actual} 个")]
    Count { expected: usize, actual: usize },

    #[error("无法解析数值 '{0}'")]
    Parse(String),

    #[error("数值无效: {0}")]
    NonFinite(String),

    #[error("关节 J{joint} 位置 {value:.3} rad 超出范围 [{min:.3}, {max:.3}]")]
    OutOfRange {
        joint: usize,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// 解析逗号分隔的定长数值列表
pub fn parse_list<const N: usize>(text: &str) -> Result<[f64; N], InputError> {
    let values = text
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|_| InputError::Parse(s.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    let array: [f64; N] = values.as_slice().try_into().map_err(|_| InputError::Count {
        expected: N,
        actual: values.len(),
    })?;
    if let Some(bad) = array.iter().find(|v| !v.is_finite()) {
        return Err(InputError::NonFinite(bad.to_string()));
    }
    Ok(array)
}

/// 关节位置验证器（使用几何模型中的关节限位）
pub struct JointValidator {
    limits: [[f64; 2]; DOF],
}

impl JointValidator {
    pub fn new(geometry: &ArmGeometry) -> Self {
        Self {
            limits: geometry.joint_limits,
        }
    }

    /// 解析并验证 6 个关节角
    pub fn parse_joints(&self, text: &str) -> Result<JointAngles, InputError> {
        let joints = parse_list::<DOF>(text)?;
        self.validate_joints(&joints)?;
        Ok(joints)
    }

    pub fn validate_joints(&self, joints: &JointAngles) -> Result<(), InputError> {
        for (i, (&value, &[min, max])) in joints.iter().zip(&self.limits).enumerate() {
            if value < min || value > max {
                return Err(InputError::OutOfRange {
                    joint: i + 1,
                    value,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }
}
