//! 单线程事件循环执行器。
//!
//! ## 模块目标（Why）
//! - 为通道与流水线提供"所有状态只在一个线程上被触碰"的执行底座：
//!   任务从任意线程提交，串行地在循环专属的工作线程上执行。
//! - 定时能力（一次性、固定速率、固定间隔）与任务队列共用同一个工作线程，
//!   避免额外的计时线程与跨线程时序协调。
//!
//! ## 结构概览（What）
//! - [`EventLoop`]：可克隆句柄，承载提交、调度、关闭与终止观测 API；
//! - [`EventLoopBuilder`]：命名、时钟注入与清理钩子的构建入口；
//! - [`ScheduledHandle`]：定时任务的取消句柄。
//!
//! ## 实现策略（How）
//! - 运行队列与定时堆由同一把互斥锁保护，条件变量充当唤醒原语：
//!   外部提交、提前到期的新定时任务与取消都通过 `notify` 打断等待；
//! - 工作线程每轮先把到期定时任务晋升进运行队列，再按 FIFO 逐个执行；
//! - 关闭后不再接受新提交，但已入队任务全部执行完才进入清理与终止。
//!
//! ## 风险提示（Trade-offs）
//! - 唤醒采用条件变量而非自管道：工作线程只在 `wait_timeout` 中停驻，
//!   因此一次 `notify` 即构成完整唤醒；虚假唤醒由外层循环重算等待窗口吸收。

mod scheduled;

pub use scheduled::ScheduledHandle;

use std::borrow::Cow;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::{CoreError, codes};
use crate::tally::{InstanceTally, TallyGuard};
use crate::time::{Clock, default_clock};

use scheduled::{ScheduledState, TimerEntry, TimerJob};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// 运行队列条目：普通任务，或已到期、待执行的定时条目。
enum WorkItem {
    Task(Task),
    Timer(TimerEntry),
}

/// `EventLoop` 是单线程事件循环的可克隆句柄。
///
/// # 设计背景（Why）
/// - 通道的全部易变状态只在其绑定的循环线程上被访问，跨线程通信统一走
///   [`execute`](EventLoop::execute)；这让流水线与编解码器免于任何内部加锁。
/// - 工作线程懒启动：构造循环不产生系统资源，首个提交才落地线程。
///
/// # 生命周期（What）
/// - 空闲创建 → 首次提交启动工作线程 → 运行 → [`shutdown`](EventLoop::shutdown)
///   → 排空队列 → 清理钩子恰好执行一次 → 终止并唤醒全部等待者；
/// - `is_terminated()` 为真蕴含 `is_shutdown()` 为真。
///
/// # 风险提示（Trade-offs）
/// - 任务内发生 panic 会被捕获并记录，工作线程继续运行；依赖任务间
///   共享状态的调用方需自行保证 panic 后的一致性。
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopInner>,
}

pub(crate) struct LoopInner {
    name: Cow<'static, str>,
    clock: Arc<dyn Clock>,
    state: Mutex<LoopState>,
    pub(crate) wakeup: Condvar,
    term: Condvar,
    shutdown: AtomicBool,
    terminated: AtomicBool,
    cleanup_runs: AtomicU32,
    worker_id: Mutex<Option<ThreadId>>,
    _tally: TallyGuard,
}

struct LoopState {
    run_queue: VecDeque<WorkItem>,
    timers: BinaryHeap<TimerEntry>,
    cleanup: Option<Box<dyn FnOnce() + Send + 'static>>,
    worker_started: bool,
    shutdown: bool,
    next_sequence: u64,
}

/// 事件循环构建器。
///
/// # 契约说明（What）
/// - `name`：工作线程名与日志标签；
/// - `clock`：单调时钟来源，缺省为 [`crate::time::SystemClock`]；
/// - `cleanup`：终止前在工作线程上恰好执行一次的收尾钩子。
pub struct EventLoopBuilder {
    name: Cow<'static, str>,
    clock: Arc<dyn Clock>,
    cleanup: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl EventLoopBuilder {
    /// 以给定名称创建构建器。
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            clock: default_clock(),
            cleanup: None,
        }
    }

    /// 注入自定义时钟。
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 注册终止前执行一次的清理钩子。
    pub fn cleanup(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(hook));
        self
    }

    /// 构建事件循环；此时尚不启动工作线程。
    pub fn build(self) -> EventLoop {
        EventLoop {
            inner: Arc::new(LoopInner {
                name: self.name,
                clock: self.clock,
                state: Mutex::new(LoopState {
                    run_queue: VecDeque::new(),
                    timers: BinaryHeap::new(),
                    cleanup: self.cleanup,
                    worker_started: false,
                    shutdown: false,
                    next_sequence: 0,
                }),
                wakeup: Condvar::new(),
                term: Condvar::new(),
                shutdown: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                cleanup_runs: AtomicU32::new(0),
                worker_id: Mutex::new(None),
                _tally: InstanceTally::acquire("flint.event_loop"),
            }),
        }
    }
}

impl EventLoop {
    /// 以默认时钟构建命名事件循环。
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        EventLoopBuilder::new(name).build()
    }

    /// 返回循环名称。
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 提交一个任务到循环线程执行。
    ///
    /// # 契约说明（What）
    /// - 任意线程可调用；同一线程的多次提交按提交顺序执行；
    /// - 即便从循环线程内部调用也只入队、绝不内联执行，保持 FIFO 语义；
    /// - 关闭后提交返回 `executor.rejected`。
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> crate::Result<(), CoreError> {
        let mut state = self.lock_state();
        if state.shutdown {
            return Err(self.rejected());
        }
        state.run_queue.push_back(WorkItem::Task(Box::new(task)));
        self.ensure_worker(&mut state);
        drop(state);
        self.inner.wakeup.notify_all();
        Ok(())
    }

    /// 调度一次性延迟任务：触发不早于 `now + delay`。
    pub fn schedule(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> crate::Result<ScheduledHandle, CoreError> {
        self.submit_timer(delay, TimerJob::Once(Some(Box::new(task))))
    }

    /// 以固定速率调度周期任务。
    ///
    /// # 契约说明（What）
    /// - 第 k 次触发的目标截止为 `start + initial_delay + k·period`；
    /// - 工作线程滞后超过一个周期时，错过的触发按序背靠背补齐，
    ///   相邻触发间隔可能远小于 `period`，但不会有触发被跳过；
    /// - 同一目标截止绝不二次触发。
    pub fn schedule_at_fixed_rate(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: impl FnMut() + Send + 'static,
    ) -> crate::Result<ScheduledHandle, CoreError> {
        self.submit_timer(
            initial_delay,
            TimerJob::FixedRate {
                run: Box::new(task),
                period,
            },
        )
    }

    /// 以固定间隔调度周期任务：下一截止 = 本次执行完成时刻 + `delay`。
    pub fn schedule_with_fixed_delay(
        &self,
        initial_delay: Duration,
        delay: Duration,
        task: impl FnMut() + Send + 'static,
    ) -> crate::Result<ScheduledHandle, CoreError> {
        self.submit_timer(
            initial_delay,
            TimerJob::FixedDelay {
                run: Box::new(task),
                delay,
            },
        )
    }

    /// 请求关闭：拒绝新提交，但已入队任务全部执行完才终止。
    ///
    /// # 契约说明（What）
    /// - 幂等；未到期的定时任务随关闭一并取消，周期任务停止重调度；
    /// - 若工作线程从未启动，此处会补启动一次，以便清理与终止流程
    ///   仍然发生在专属线程上。
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        if !state.shutdown {
            state.shutdown = true;
            self.inner.shutdown.store(true, Ordering::Release);
            // 随关闭取消未到期条目时同步置位取消标记，保证句柄与堆一致。
            for entry in state.timers.drain() {
                entry.state.cancelled.store(true, Ordering::Release);
            }
            self.ensure_worker(&mut state);
        }
        drop(state);
        self.inner.wakeup.notify_all();
    }

    /// 是否已进入关闭流程。
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// 是否已完成终止。
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// 阻塞等待终止，最多 `timeout`；返回是否已终止。
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        while !self.inner.terminated.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .inner
                .term
                .wait_timeout(state, deadline - now)
                .expect("event-loop state lock poisoned");
            state = next;
        }
        true
    }

    /// 当前线程是否就是循环的工作线程。
    pub fn in_event_loop(&self) -> bool {
        let worker = self
            .inner
            .worker_id
            .lock()
            .expect("event-loop worker-id lock poisoned");
        worker.is_some_and(|id| id == thread::current().id())
    }

    /// 清理钩子的累计执行次数；终止后恒为 1。
    pub fn cleanup_runs(&self) -> u32 {
        self.inner.cleanup_runs.load(Ordering::Acquire)
    }

    fn submit_timer(
        &self,
        delay: Duration,
        job: TimerJob,
    ) -> crate::Result<ScheduledHandle, CoreError> {
        let scheduled = Arc::new(ScheduledState::default());
        let handle = ScheduledHandle {
            state: Arc::clone(&scheduled),
            inner: Arc::downgrade(&self.inner),
        };
        let mut state = self.lock_state();
        if state.shutdown {
            return Err(self.rejected());
        }
        let deadline = self.inner.clock.now() + delay;
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.timers.push(TimerEntry {
            deadline,
            sequence,
            state: scheduled,
            job,
        });
        self.ensure_worker(&mut state);
        drop(state);
        // 新任务可能比当前睡眠窗口更早到期，唤醒工作线程重算等待。
        self.inner.wakeup.notify_all();
        Ok(handle)
    }

    fn ensure_worker(&self, state: &mut LoopState) {
        if state.worker_started {
            return;
        }
        state.worker_started = true;
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name(self.inner.name.to_string())
            .spawn(move || worker_main(inner))
            .expect("failed to spawn event-loop worker thread");
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.inner
            .state
            .lock()
            .expect("event-loop state lock poisoned")
    }

    fn rejected(&self) -> CoreError {
        CoreError::new(
            codes::EXECUTOR_REJECTED,
            format!("event loop `{}` is shut down", self.inner.name),
        )
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.inner.name)
            .field("shutdown", &self.is_shutdown())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// 工作线程主循环。
///
/// # 逻辑解析（How）
/// 1. 依据最早截止时间计算等待窗口并停驻在条件变量上；
/// 2. 把所有到期定时条目按序晋升进运行队列；
/// 3. 逐个执行运行队列条目；
/// 4. 处于关闭状态且两个队列皆空时退出；
/// 5. 退出后执行清理钩子恰好一次，随后置终止位并唤醒等待者。
fn worker_main(inner: Arc<LoopInner>) {
    {
        let mut worker = inner
            .worker_id
            .lock()
            .expect("event-loop worker-id lock poisoned");
        *worker = Some(thread::current().id());
    }

    loop {
        let item = {
            let mut state = inner
                .state
                .lock()
                .expect("event-loop state lock poisoned");
            loop {
                let now = inner.clock.now();
                promote_due(&mut state, now);
                if let Some(item) = state.run_queue.pop_front() {
                    break Some(item);
                }
                if state.shutdown {
                    break None;
                }
                state = match earliest_wait(&state, now) {
                    Some(wait) if wait.is_zero() => state,
                    Some(wait) => {
                        inner
                            .wakeup
                            .wait_timeout(state, wait)
                            .expect("event-loop state lock poisoned")
                            .0
                    }
                    None => inner
                        .wakeup
                        .wait(state)
                        .expect("event-loop state lock poisoned"),
                };
            }
        };

        match item {
            Some(WorkItem::Task(task)) => run_task(&inner.name, task),
            Some(WorkItem::Timer(entry)) => run_timer(&inner, entry),
            None => break,
        }
    }

    let cleanup = inner
        .state
        .lock()
        .expect("event-loop state lock poisoned")
        .cleanup
        .take();
    if let Some(hook) = cleanup
        && catch_unwind(AssertUnwindSafe(hook)).is_err()
    {
        tracing::warn!(name = %inner.name, "cleanup hook panicked; terminating anyway");
    }
    inner.cleanup_runs.fetch_add(1, Ordering::AcqRel);

    {
        // 持锁置位，避免等待者在检查与停驻之间错过通知。
        let _state = inner
            .state
            .lock()
            .expect("event-loop state lock poisoned");
        inner.terminated.store(true, Ordering::Release);
    }
    inner.term.notify_all();
}

fn promote_due(state: &mut LoopState, now: Instant) {
    loop {
        let (cancelled, due) = match state.timers.peek() {
            Some(head) => (
                head.state.cancelled.load(Ordering::Acquire),
                head.deadline <= now,
            ),
            None => break,
        };
        if cancelled {
            state.timers.pop();
            continue;
        }
        if !due {
            break;
        }
        let entry = state.timers.pop().expect("peeked timer entry");
        state.run_queue.push_back(WorkItem::Timer(entry));
    }
}

fn earliest_wait(state: &LoopState, now: Instant) -> Option<Duration> {
    state
        .timers
        .peek()
        .map(|entry| entry.deadline.saturating_duration_since(now))
}

fn run_task(name: &str, task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::warn!(name, "submitted task panicked; worker continues");
    }
}

fn run_timer(inner: &Arc<LoopInner>, mut entry: TimerEntry) {
    if entry.state.cancelled.load(Ordering::Acquire) {
        return;
    }
    let next_deadline = match &mut entry.job {
        TimerJob::Once(slot) => {
            if let Some(task) = slot.take() {
                run_task(&inner.name, task);
            }
            None
        }
        TimerJob::FixedRate { run, period } => {
            if catch_unwind(AssertUnwindSafe(|| run())).is_err() {
                tracing::warn!(name = %inner.name, "fixed-rate task panicked; worker continues");
            }
            // 以目标截止为基准推进，滞后时自然形成背靠背补齐。
            Some(entry.deadline + *period)
        }
        TimerJob::FixedDelay { run, delay } => {
            if catch_unwind(AssertUnwindSafe(|| run())).is_err() {
                tracing::warn!(name = %inner.name, "fixed-delay task panicked; worker continues");
            }
            Some(inner.clock.now() + *delay)
        }
    };

    if let Some(deadline) = next_deadline {
        if entry.state.cancelled.load(Ordering::Acquire) {
            return;
        }
        let mut state = inner
            .state
            .lock()
            .expect("event-loop state lock poisoned");
        if state.shutdown {
            return;
        }
        entry.deadline = deadline;
        entry.sequence = state.next_sequence;
        state.next_sequence += 1;
        state.timers.push(entry);
    }
}
