//! 节点地址定义
//!
//! 每个关节/夹爪是一个独立的电机节点：
//! - 控制帧 ID = 节点号（关节 1-6 → `0x01..=0x06`，夹爪 → `0x07`）
//! - 反馈帧 ID = 节点号 + [`FEEDBACK_ID_OFFSET`]（`0x11..=0x17`）

/// 关节数量
pub const JOINT_COUNT: usize = 6;

/// 夹爪节点号
pub const GRIPPER_NODE: u8 = 0x07;

/// 反馈帧 ID 偏移（master id = node id + 0x10）
pub const FEEDBACK_ID_OFFSET: u32 = 0x10;

/// 电机节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeId {
    /// 关节（0-based 索引，0..6）
    Joint(u8),
    /// 夹爪
    Gripper,
}

impl NodeId {
    /// 全部关节节点（按关节顺序）
    pub const JOINTS: [NodeId; JOINT_COUNT] = [
        NodeId::Joint(0),
        NodeId::Joint(1),
        NodeId::Joint(2),
        NodeId::Joint(3),
        NodeId::Joint(4),
        NodeId::Joint(5),
    ];

    /// 由 0-based 关节索引构造
    pub fn joint(index: usize) -> Option<Self> {
        (index < JOINT_COUNT).then_some(NodeId::Joint(index as u8))
    }

    /// 节点号（总线上的电机 ID）
    pub fn raw(self) -> u8 {
        match self {
            NodeId::Joint(index) => index + 1,
            NodeId::Gripper => GRIPPER_NODE,
        }
    }

    /// 由节点号解析
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1..=6 => Some(NodeId::Joint(raw - 1)),
            GRIPPER_NODE => Some(NodeId::Gripper),
            _ => None,
        }
    }

    /// 控制帧 CAN ID
    pub fn command_id(self) -> u32 {
        self.raw() as u32
    }

    /// 反馈帧 CAN ID
    pub fn feedback_id(self) -> u32 {
        self.raw() as u32 + FEEDBACK_ID_OFFSET
    }

    /// 由反馈帧 CAN ID 解析节点
    pub fn from_feedback_id(id: u32) -> Option<Self> {
        let raw = id.checked_sub(FEEDBACK_ID_OFFSET)?;
        u8::try_from(raw).ok().and_then(Self::from_raw)
    }

    /// 关节索引（夹爪返回 `None`）
    pub fn joint_index(self) -> Option<usize> {
        match self {
            NodeId::Joint(index) => Some(index as usize),
            NodeId::Gripper => None,
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Joint(index) => write!(f, "J{}", index + 1),
            NodeId::Gripper => write!(f, "gripper"),
        }
    }
}
