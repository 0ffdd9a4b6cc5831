//! 安全检查模块
//!
//! 大幅移动前要求用户确认

use anyhow::Result;
use startouch_sdk::kinematics::JointAngles;

/// 超过该角度（°）的单关节移动需要确认
pub const CONFIRM_THRESHOLD_DEG: f64 = 30.0;

/// 安全检查器
pub struct SafetyChecker {
    threshold_deg: f64,
    force: bool,
}

impl SafetyChecker {
    pub fn new(force: bool) -> Self {
        Self {
            threshold_deg: CONFIRM_THRESHOLD_DEG,
            force,
        }
    }

    /// 各关节最大位移（°）
    pub fn max_delta_degrees(current: &JointAngles, target: &JointAngles) -> f64 {
        current
            .iter()
            .zip(target)
            .map(|(a, b)| (b - a).abs())
            .fold(0.0_f64, f64::max)
            .to_degrees()
    }

    pub fn requires_confirmation(&self, current: &JointAngles, target: &JointAngles) -> bool {
        !self.force && Self::max_delta_degrees(current, target) > self.threshold_deg
    }

    /// 需要时弹出确认提示，返回是否继续
    pub fn confirm(&self, current: &JointAngles, target: &JointAngles) -> Result<bool> {
        if !self.requires_confirmation(current, target) {
            return Ok(true);
        }

        println!("⚠️  大幅移动检测");
        println!("  最大角度: {:.1}°", Self::max_delta_degrees(current, target));

        let confirmed = inquire::Confirm::new("确定要继续吗？")
            .with_default(false)
            .prompt()
            .map_err(|e| anyhow::anyhow!("用户交互失败: {}", e))?;

        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_confirmation() {
        let checker = SafetyChecker::new(false);
        let current = [0.0; 6];

        let small = [0.1, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert!(!checker.requires_confirmation(&current, &small));

        let large = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        assert!(checker.requires_confirmation(&current, &large));
        assert!(!SafetyChecker::new(true).requires_confirmation(&current, &large));
    }

    #[test]
    fn test_max_delta_degrees() {
        let delta = SafetyChecker::max_delta_degrees(&[0.5; 6], &[0.5 - std::f64::consts::FRAC_PI_2; 6]);
        assert!((delta - 90.0).abs() < 1e-9);
    }
}
