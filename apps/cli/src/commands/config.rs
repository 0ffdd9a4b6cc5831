//! 配置管理命令
//!
//! CLI 配置即完整的 [`ArmConfig`]，以 TOML 保存在 `<config_dir>/startouch/arm.toml`，
//! 标定目录缺省为同目录下的 `params/`

use anyhow::{Context, Result};
use clap::Subcommand;
use startouch_sdk::ArmConfig;
use startouch_sdk::kinematics::CalibrationPaths;
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件路径
pub fn config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
    path.push("startouch");
    path.push("arm.toml");
    Ok(path)
}

/// 配置文件不存在时使用的默认配置（标定目录为 `<配置目录>/params`）
pub fn default_config(path: &Path) -> ArmConfig {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ArmConfig {
        calibration: CalibrationPaths::in_dir(dir.join("params")),
        ..ArmConfig::default()
    }
}

/// 加载配置（文件不存在时返回 [`default_config`]）
pub fn load(path: &Path) -> Result<ArmConfig> {
    if !path.exists() {
        return Ok(default_config(path));
    }
    ArmConfig::from_toml_file(path).with_context(|| format!("读取配置文件失败: {}", path.display()))
}

/// 校验并保存配置
pub fn save(config: &ArmConfig, path: &Path) -> Result<()> {
    config.validate().context("配置无效")?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("创建配置目录失败")?;
    }
    fs::write(path, config.to_toml_string()?).context("写入配置文件失败")?;
    Ok(())
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// CAN 接口名称（如 can0）
        #[arg(long = "can")]
        can_interface: Option<String>,

        /// 是否使用 CAN-FD
        #[arg(long)]
        fd: Option<bool>,

        /// 是否安装夹爪
        #[arg(long)]
        gripper: Option<bool>,

        /// 控制频率（Hz）
        #[arg(long)]
        ctrl_hz: Option<f64>,

        /// 标定目录（包含 permutationMatrix.csv / pi_b.csv / pi_fr.csv）
        #[arg(long)]
        calibration_dir: Option<PathBuf>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称（interface / fd / gripper / ctrl_hz / calibration / all）
        #[arg(default_value = "all")]
        key: String,
    },

    /// 检查配置（含标定文件）
    Check,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        let path = config_file()?;
        self.execute_at(&path)
    }

    pub fn execute_at(self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Set {
                can_interface,
                fd,
                gripper,
                ctrl_hz,
                calibration_dir,
            } => {
                let mut config = load(path)?;
                if let Some(iface) = can_interface {
                    println!("✅ 设置默认接口: {}", iface);
                    config.can_interface = iface;
                }
                if let Some(fd) = fd {
                    println!("✅ CAN-FD: {}", fd);
                    config.enable_fd = fd;
                }
                if let Some(gripper) = gripper {
                    println!("✅ 夹爪: {}", gripper);
                    config.gripper_exist = gripper;
                }
                if let Some(hz) = ctrl_hz {
                    println!("✅ 控制频率: {} Hz", hz);
                    config.ctrl_hz = hz;
                }
                if let Some(dir) = calibration_dir {
                    println!("✅ 标定目录: {}", dir.display());
                    config.calibration = CalibrationPaths::in_dir(&dir);
                }
                save(&config, path)
            },

            ConfigCommand::Get { key } => {
                let config = load(path)?;
                match key.as_str() {
                    "interface" => println!("{}", config.can_interface),
                    "fd" => println!("{}", config.enable_fd),
                    "gripper" => println!("{}", config.gripper_exist),
                    "ctrl_hz" => println!("{}", config.ctrl_hz),
                    "calibration" => {
                        let paths = &config.calibration;
                        println!("{}", paths.permutation_matrix.display());
                        println!("{}", paths.pi_b.display());
                        println!("{}", paths.pi_fr.display());
                    },
                    _ => print!("{}", config.to_toml_string()?),
                }
                Ok(())
            },

            ConfigCommand::Check => {
                println!("配置文件: {}", path.display());
                let config = load(path)?;
                config.validate().context("配置无效")?;
                println!("  接口: {} (FD: {})", config.can_interface, config.enable_fd);
                println!("  夹爪: {}", config.gripper_exist);
                println!("  控制频率: {} Hz", config.ctrl_hz);

                let set = startouch_sdk::kinematics::CalibrationSet::load(&config.calibration)
                    .context("标定文件无效")?;
                println!("  标定: {} 个基参数", set.base_parameter_count());
                println!("✅ 配置有效");
                Ok(())
            },
        }
    }
}
