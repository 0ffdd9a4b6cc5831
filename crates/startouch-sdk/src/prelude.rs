//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use startouch_sdk::prelude::*;
//! ```

// 客户端层
pub use crate::client::{ArmConfig, ArmSession, HOME_POSE, SessionError};

// 驱动层状态
pub use crate::driver::{ArmSnapshot, GripperState, JointState, ServoMode, Trajectory};

// 运动学
pub use crate::kinematics::{CalibrationPaths, JointAngles, Pose};

// CAN 层（常用 Trait）
pub use crate::can::CanAdapter;
