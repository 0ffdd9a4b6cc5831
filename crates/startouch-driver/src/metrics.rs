//! 控制线程性能指标
//!
//! 原子计数器，控制线程写、任意线程读，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 控制线程实时指标
///
/// # 使用示例
///
/// ```rust
/// use startouch_driver::ControlMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = ControlMetrics::new();
/// metrics.ticks.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().ticks, 1);
/// ```
#[derive(Debug, Default)]
pub struct ControlMetrics {
    /// 控制周期数
    pub ticks: AtomicU64,
    /// 周期超时（本周期耗时超过周期，锚点被重置）
    pub overruns: AtomicU64,
    /// 发送成功的帧数
    pub tx_frames: AtomicU64,
    /// 发送重试次数
    pub tx_retries: AtomicU64,
    /// 解析成功的反馈帧数
    pub rx_frames: AtomicU64,
    /// 无反馈的周期数
    pub rx_timeouts: AtomicU64,
    /// 设备 / 总线错误次数
    pub device_errors: AtomicU64,
    /// 邮箱被调用方占用、本周期沿用旧目标的次数
    pub mailbox_contention: AtomicU64,
    /// 未被消费就被新指令覆盖的指令数
    pub commands_superseded: AtomicU64,
    /// 安装的轨迹数
    pub trajectories_started: AtomicU64,
    /// 进入故障状态的次数
    pub faults: AtomicU64,
    /// 夹爪目标接近闭合（低于阈值）的次数
    pub gripper_near_zero: AtomicU64,
    /// 夹爪目标被截断到 `[0, 1]` 的次数
    pub gripper_clamped: AtomicU64,
}

impl ControlMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 读取快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            tx_retries: self.tx_retries.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            rx_timeouts: self.rx_timeouts.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            mailbox_contention: self.mailbox_contention.load(Ordering::Relaxed),
            commands_superseded: self.commands_superseded.load(Ordering::Relaxed),
            trajectories_started: self.trajectories_started.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            gripper_near_zero: self.gripper_near_zero.load(Ordering::Relaxed),
            gripper_clamped: self.gripper_clamped.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        for counter in [
            &self.ticks,
            &self.overruns,
            &self.tx_frames,
            &self.tx_retries,
            &self.rx_frames,
            &self.rx_timeouts,
            &self.device_errors,
            &self.mailbox_contention,
            &self.commands_superseded,
            &self.trajectories_started,
            &self.faults,
            &self.gripper_near_zero,
            &self.gripper_clamped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub overruns: u64,
    pub tx_frames: u64,
    pub tx_retries: u64,
    pub rx_frames: u64,
    pub rx_timeouts: u64,
    pub device_errors: u64,
    pub mailbox_contention: u64,
    pub commands_superseded: u64,
    pub trajectories_started: u64,
    pub faults: u64,
    pub gripper_near_zero: u64,
    pub gripper_clamped: u64,
}

impl MetricsSnapshot {
    /// 周期超时率（百分比）
    ///
    /// `ticks` 为 0 时返回 0.0。
    pub fn overrun_rate(&self) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        (self.overruns as f64 / self.ticks as f64) * 100.0
    }

    /// 无反馈周期占比（百分比）
    pub fn timeout_rate(&self) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        (self.rx_timeouts as f64 / self.ticks as f64) * 100.0
    }
}
