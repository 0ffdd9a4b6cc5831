//! 运动学层错误类型定义

use std::path::PathBuf;
use thiserror::Error;

/// 运动学计算错误
///
/// 所有变体都只返回给调用方，不改变控制器状态。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KinematicsError {
    /// 所有候选初值都未收敛
    #[error("Target pose unreachable after {iterations} iterations (residual {residual:.3e})")]
    Unreachable { iterations: usize, residual: f64 },

    /// 解处于奇异位形附近
    #[error("Solution is near a singular configuration (sigma_min = {sigma_min:.3e})")]
    NearSingular { sigma_min: f64 },

    /// 零范数或非有限四元数
    #[error("Invalid quaternion (norm = {norm})")]
    InvalidQuaternion { norm: f64 },

    /// 输入包含 NaN / 无穷大
    #[error("Non-finite value in {0}")]
    NonFinite(&'static str),
}

/// 标定文件错误（会话创建阶段的致命错误）
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Failed to read calibration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{}:{line}: invalid number '{token}'", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        token: String,
    },

    #[error("Calibration file {} contains no values", path.display())]
    Empty { path: PathBuf },

    #[error("Calibration shape mismatch: {0}")]
    Shape(String),
}
