//! 会话配置
//!
//! [`ArmConfig`] 可以从 TOML 加载，缺省字段取默认值；`[calibration]` 三个路径必填，
//! 缺失时 [`ArmConfig::validate`] 返回错误：
//!
//! ```toml
//! can_interface = "can0"
//! enable_fd = true
//! gripper_exist = true
//!
//! [calibration]
//! permutation_matrix = "/etc/startouch/permutationMatrix.csv"
//! pi_b = "/etc/startouch/pi_b.csv"
//! pi_fr = "/etc/startouch/pi_fr.csv"
//!
//! [servo]
//! kp = [80.0, 80.0, 80.0, 40.0, 30.0, 30.0]
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use startouch_driver::{GripperConfig, PipelineConfig, ServoConfig, TransportConfig};
use startouch_kinematics::{ArmGeometry, CalibrationPaths, IkConfig, JointAngles};
use std::path::Path;
use std::time::Duration;

/// 回零位姿（全零关节角）
pub const HOME_POSE: JointAngles = [0.0; 6];

/// 默认控制频率（Hz）
pub const DEFAULT_CTRL_HZ: f64 = 400.0;

/// 回零默认时长（s）
pub const DEFAULT_HOME_DURATION: f64 = 3.0;

/// `set_joint` / 位姿规划的默认时长（s）
pub const DEFAULT_MOVE_DURATION: f64 = 2.0;

/// 控制频率上限（Hz）
const MAX_CTRL_HZ: f64 = 2000.0;

/// 机械臂会话配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    /// CAN 接口名称（如 "can0"）
    pub can_interface: String,
    /// 是否使用 CAN-FD
    pub enable_fd: bool,
    /// 是否安装夹爪
    pub gripper_exist: bool,
    /// 控制频率（Hz）
    pub ctrl_hz: f64,
    /// 回零时长（s）
    pub home_duration: f64,
    /// 笛卡尔规划相邻采样点的最大关节跳变（rad）
    pub max_joint_step: f64,
    /// 上电等待所有节点反馈的时间（ms）
    pub startup_timeout_ms: u64,
    /// 故障恢复等待时间（ms）
    pub recovery_timeout_ms: u64,
    /// 每周期首帧反馈等待时间（µs）
    pub first_frame_timeout_us: u64,
    /// 标定文件（必填，会话创建时加载）
    pub calibration: CalibrationPaths,
    pub servo: ServoConfig,
    pub gripper: GripperConfig,
    pub geometry: ArmGeometry,
    pub ik: IkConfig,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            can_interface: "can0".to_string(),
            enable_fd: false,
            gripper_exist: false,
            ctrl_hz: DEFAULT_CTRL_HZ,
            home_duration: DEFAULT_HOME_DURATION,
            max_joint_step: startouch_driver::DEFAULT_MAX_JOINT_STEP,
            startup_timeout_ms: 500,
            recovery_timeout_ms: 500,
            first_frame_timeout_us: 2000,
            calibration: CalibrationPaths::default(),
            servo: ServoConfig::default(),
            gripper: GripperConfig::default(),
            geometry: ArmGeometry::startouch(),
            ik: IkConfig::default(),
        }
    }
}

impl ArmConfig {
    /// 指定接口与标定文件，其余字段取默认值
    pub fn new(can_interface: impl Into<String>, calibration: CalibrationPaths) -> Self {
        Self {
            can_interface: can_interface.into(),
            calibration,
            ..Default::default()
        }
    }

    pub fn with_fd(mut self, enable_fd: bool) -> Self {
        self.enable_fd = enable_fd;
        self
    }

    pub fn with_gripper(mut self, gripper_exist: bool) -> Self {
        self.gripper_exist = gripper_exist;
        self
    }

    /// 从 TOML 文本解析
    ///
    /// # 错误
    /// - `ConfigError::Parse`: TOML 语法或字段类型错误
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// 从 TOML 文件加载
    ///
    /// # 错误
    /// - `ConfigError::Io`: 文件读取失败
    /// - `ConfigError::Parse`: 解析失败
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 序列化为 TOML 文本
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 校验所有参数
    ///
    /// # 错误
    /// - `ConfigError::Invalid`: 第一个不合法的字段及原因
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.can_interface.trim().is_empty() {
            return invalid("can_interface must not be empty".to_string());
        }
        if let Some(field) = self.calibration.first_missing() {
            return invalid(format!("calibration.{} must be set", field));
        }
        if !self.ctrl_hz.is_finite() || self.ctrl_hz <= 0.0 || self.ctrl_hz > MAX_CTRL_HZ {
            return invalid(format!(
                "ctrl_hz must be in (0, {}], got {}",
                MAX_CTRL_HZ, self.ctrl_hz
            ));
        }
        if !self.home_duration.is_finite() || self.home_duration <= 0.0 {
            return invalid(format!(
                "home_duration must be positive, got {}",
                self.home_duration
            ));
        }
        if !self.max_joint_step.is_finite() || self.max_joint_step <= 0.0 {
            return invalid(format!(
                "max_joint_step must be positive, got {}",
                self.max_joint_step
            ));
        }
        if self.startup_timeout_ms == 0 || self.recovery_timeout_ms == 0 {
            return invalid("startup/recovery timeouts must be non-zero".to_string());
        }
        if self.first_frame_timeout_us == 0 {
            return invalid("first_frame_timeout_us must be non-zero".to_string());
        }
        if !self.geometry.is_valid() {
            return invalid("geometry contains non-finite values or empty joint limits".to_string());
        }
        if !self.ik.is_valid() {
            return invalid("ik parameters must be positive and finite".to_string());
        }
        if !self.geometry.within_limits(&HOME_POSE) {
            return invalid("home pose is outside the configured joint limits".to_string());
        }
        self.servo.validate().map_err(|e| ConfigError::Invalid(format!("servo: {}", e)))?;
        if self.gripper_exist {
            self.gripper
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("gripper: {}", e)))?;
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    /// 控制线程配置
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ctrl_hz: self.ctrl_hz,
            servo: self.servo.clone(),
            gripper: self.gripper_exist.then(|| self.gripper.clone()),
            transport: TransportConfig {
                first_frame_timeout: Duration::from_micros(self.first_frame_timeout_us),
                ..Default::default()
            },
            startup_timeout: self.startup_timeout(),
            recovery_timeout: self.recovery_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_config(can_interface: &str) -> ArmConfig {
        ArmConfig::new(can_interface, CalibrationPaths::in_dir("/etc/startouch"))
    }

    #[test]
    fn test_defaults() {
        let config = sample_config("can0");
        assert!(config.validate().is_ok());
        assert_eq!(config.ctrl_hz, 400.0);
        assert_eq!(config.home_duration, 3.0);
        assert_eq!(
            config.calibration.pi_b,
            std::path::PathBuf::from("/etc/startouch/pi_b.csv")
        );
    }

    #[test]
    fn test_calibration_paths_required() {
        let result = ArmConfig::default().validate();
        assert!(
            matches!(result, Err(ConfigError::Invalid(ref msg)) if msg == "calibration.permutation_matrix must be set")
        );

        let mut config = sample_config("can0");
        config.calibration.pi_fr = Default::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("pi_fr")));

        // TOML 中缺少 [calibration] 时解析成功，校验失败
        let parsed = ArmConfig::from_toml_str("can_interface = \"can1\"").unwrap();
        assert!(parsed.validate().is_err());

        // 只写了一部分路径
        assert!(matches!(
            ArmConfig::from_toml_str("[calibration]\npi_b = \"pi_b.csv\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ArmConfig::from_toml_str(
            r#"
            can_interface = "can1"
            enable_fd = true
            gripper_exist = true

            [calibration]
            permutation_matrix = "params/permutationMatrix.csv"
            pi_b = "params/pi_b.csv"
            pi_fr = "params/pi_fr.csv"

            [servo]
            max_send_retries = 4
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.can_interface, "can1");
        assert!(config.enable_fd);
        assert!(config.gripper_exist);
        assert_eq!(config.calibration, CalibrationPaths::in_dir("params"));
        assert_eq!(config.servo.max_send_retries, 4);
        assert_eq!(config.servo.kp, ServoConfig::default().kp);
        assert_eq!(config.ctrl_hz, DEFAULT_CTRL_HZ);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = sample_config("vcan0").with_gripper(true).with_fd(true);
        let text = config.to_toml_string().unwrap();
        assert_eq!(ArmConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "can_interface = \"can2\"\nctrl_hz = 200.0").unwrap();
        let config = ArmConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.can_interface, "can2");
        assert_eq!(config.ctrl_hz, 200.0);

        assert!(matches!(
            ArmConfig::from_toml_file("/nonexistent/arm.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(matches!(
            ArmConfig::from_toml_str("ctrl_hz = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation_errors() {
        let config = ArmConfig {
            ctrl_hz: 0.0,
            ..sample_config("can0")
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("ctrl_hz")));

        assert!(ArmConfig::new("", CalibrationPaths::in_dir("/etc")).validate().is_err());

        let config = ArmConfig {
            home_duration: -1.0,
            ..sample_config("can0")
        };
        assert!(config.validate().is_err());

        let mut config = sample_config("can0").with_gripper(true);
        config.gripper.speed = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.starts_with("gripper")));

        // 无夹爪时不校验夹爪参数
        config.gripper_exist = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_mapping() {
        let config = sample_config("can0").with_gripper(true);
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.ctrl_hz, 400.0);
        assert!(pipeline.gripper.is_some());
        assert_eq!(pipeline.transport.first_frame_timeout, Duration::from_millis(2));
        assert!(pipeline.validate().is_ok());
    }
}
