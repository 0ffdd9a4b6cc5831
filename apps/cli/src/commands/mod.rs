//! 命令定义和实现

pub mod config;
pub mod gravity;
pub mod gripper;
pub mod motion;
pub mod state;

pub use config::ConfigCommand;
pub use gravity::GravityCommand;
pub use gripper::GripperCommand;
pub use motion::{MoveCommand, PoseCommand};
pub use state::StateCommand;
