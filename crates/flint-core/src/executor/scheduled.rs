use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::LoopInner;

/// 定时任务的执行体与重调度模式。
///
/// # 契约说明（What）
/// - `Once`：一次性任务，触发后不再回到定时堆；
/// - `FixedRate`：固定速率，下一目标截止 = 本次目标截止 + `period`，
///   工作线程落后时按到期顺序背靠背补齐，不跳过任何一次触发；
/// - `FixedDelay`：固定间隔，下一截止 = 本次执行完成时刻 + `delay`。
pub(crate) enum TimerJob {
    Once(Option<Box<dyn FnOnce() + Send + 'static>>),
    FixedRate {
        run: Box<dyn FnMut() + Send + 'static>,
        period: Duration,
    },
    FixedDelay {
        run: Box<dyn FnMut() + Send + 'static>,
        delay: Duration,
    },
}

impl fmt::Debug for TimerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerJob::Once(_) => f.write_str("Once"),
            TimerJob::FixedRate { period, .. } => {
                f.debug_struct("FixedRate").field("period", period).finish()
            }
            TimerJob::FixedDelay { delay, .. } => {
                f.debug_struct("FixedDelay").field("delay", delay).finish()
            }
        }
    }
}

/// 定时堆条目：绝对截止时间 + 提交序号构成全序。
///
/// # 逻辑解析（How）
/// - `BinaryHeap` 弹出最大元素，因此 `Ord` 实现刻意反转比较方向，
///   令"截止更早者更大"，堆顶即最近到期的任务；
/// - 同一截止时间按提交序号先到先触发，保证调度顺序可复现。
#[derive(Debug)]
pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) sequence: u64,
    pub(crate) state: std::sync::Arc<ScheduledState>,
    pub(crate) job: TimerJob,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // 反转方向：更早的截止时间在堆顶。
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// 定时任务的共享取消位。
#[derive(Debug, Default)]
pub(crate) struct ScheduledState {
    pub(crate) cancelled: AtomicBool,
}

/// `ScheduledHandle` 是定时任务的可取消句柄。
///
/// # 设计背景（Why）
/// - 周期任务需要一个跨线程安全的"停止未来触发"开关；
/// - 句柄只持有事件循环的弱引用，循环终止后取消退化为纯标记操作。
///
/// # 契约说明（What）
/// - `cancel` 幂等：首次调用置位并唤醒工作线程，使其重算等待窗口并剔除条目；
/// - 取消只抑制未来触发，已经从定时堆晋升到运行队列的那次触发照常执行。
#[derive(Debug)]
pub struct ScheduledHandle {
    pub(crate) state: std::sync::Arc<ScheduledState>,
    pub(crate) inner: Weak<LoopInner>,
}

impl ScheduledHandle {
    /// 取消任务的全部未来触发。
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::AcqRel)
            && let Some(inner) = self.inner.upgrade()
        {
            // 唤醒可能正睡到该截止时间的工作线程。
            inner.wakeup.notify_all();
        }
    }

    /// 查询是否已被取消。
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}
