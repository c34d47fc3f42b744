use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{CoreError, codes};

/// 完成令牌的三态快照。
///
/// # 契约说明（What）
/// - `Pending`：操作尚未完成；
/// - `Success`：操作成功；
/// - `Failure`：操作失败并携带原因。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompletionState {
    /// 尚未完成。
    Pending,
    /// 成功完成。
    Success,
    /// 失败完成。
    Failure(CoreError),
}

impl CompletionState {
    /// 是否已经离开 `Pending` 状态。
    pub fn is_done(&self) -> bool {
        !matches!(self, CompletionState::Pending)
    }
}

/// `CompletionToken` 是通道操作的一次性完成原语。
///
/// # 设计背景（Why）
/// - 通道的公共操作从任意线程发起，却在所属事件循环线程上真正执行；
///   调用方需要一个可跨线程等待的句柄来观察结果。
/// - 完成方与观察方解耦：事件循环是唯一生产者，任意多个线程可以消费快照。
///
/// # 逻辑解析（How）
/// - 内部以 `Mutex<CompletionState>` 承载状态，`Condvar` 唤醒等待者；
/// - 状态迁移一次性生效：首个完成尝试获胜，之后的尝试返回 `false` 且不产生副作用。
///
/// # 契约说明（What）
/// - **前置条件**：无；令牌可在完成前后被任意克隆；
/// - **后置条件**：`is_done()` 一旦为真便永远为真，`state()` 返回的快照不再变化。
///
/// # 风险提示（Trade-offs）
/// - 采用互斥锁而非无锁 CAS，换取失败原因可以携带堆上消息；完成路径仅在
///   每操作一次的频率上执行，锁开销可以忽略。
#[derive(Clone, Debug)]
pub struct CompletionToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug)]
struct TokenInner {
    state: Mutex<CompletionState>,
    done: Condvar,
}

impl CompletionToken {
    /// 创建处于 `Pending` 状态的令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                state: Mutex::new(CompletionState::Pending),
                done: Condvar::new(),
            }),
        }
    }

    /// 尝试以成功完成令牌，返回是否由本次调用完成。
    pub fn succeed(&self) -> bool {
        self.complete(CompletionState::Success)
    }

    /// 尝试以失败完成令牌，返回是否由本次调用完成。
    pub fn fail(&self, cause: CoreError) -> bool {
        self.complete(CompletionState::Failure(cause))
    }

    /// 以取消语义失败完成令牌。
    pub fn fail_cancelled(&self) -> bool {
        self.fail(CoreError::new(
            codes::TASK_CANCELLED,
            "operation cancelled before completion",
        ))
    }

    /// 返回当前状态快照。
    pub fn state(&self) -> CompletionState {
        self.inner
            .state
            .lock()
            .expect("completion-token state lock poisoned")
            .clone()
    }

    /// 是否已完成（成功或失败）。
    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    /// 是否成功完成。
    pub fn is_success(&self) -> bool {
        matches!(self.state(), CompletionState::Success)
    }

    /// 返回失败原因；未完成或成功时为 `None`。
    pub fn failure(&self) -> Option<CoreError> {
        match self.state() {
            CompletionState::Failure(cause) => Some(cause),
            _ => None,
        }
    }

    /// 阻塞等待令牌完成，最多等待 `timeout`；返回是否在期限内完成。
    ///
    /// # 契约说明（What）
    /// - 禁止在事件循环线程上调用：完成动作正是由该线程执行，自等待将死锁；
    /// - 虚假唤醒被内部循环吸收，调用方无需重试。
    pub fn await_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self
            .inner
            .state
            .lock()
            .expect("completion-token state lock poisoned");
        while !state.is_done() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .inner
                .done
                .wait_timeout(state, deadline - now)
                .expect("completion-token state lock poisoned");
            state = next;
        }
        true
    }

    fn complete(&self, next: CompletionState) -> bool {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("completion-token state lock poisoned");
        if state.is_done() {
            return false;
        }
        *state = next;
        drop(state);
        self.inner.done.notify_all();
        true
    }
}

impl Default for CompletionToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_completion_wins() {
        // Why: 状态迁移必须一次性生效，后续尝试不得覆盖首个结果。
        let token = CompletionToken::new();
        assert!(token.succeed());
        assert!(!token.fail(CoreError::new(codes::CHANNEL_CLOSED, "late")));
        assert!(token.is_success());
    }

    #[test]
    fn await_done_observes_cross_thread_completion() {
        // How: 后台线程延迟完成，主线程在期限内应观察到成功。
        let token = CompletionToken::new();
        let remote = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.succeed();
        });
        assert!(token.await_done(Duration::from_secs(2)));
        assert!(token.is_success());
    }

    #[test]
    fn await_done_times_out_when_pending() {
        let token = CompletionToken::new();
        assert!(!token.await_done(Duration::from_millis(30)));
        assert!(!token.is_done());
    }

    #[test]
    fn cancelled_failure_uses_stable_code() {
        let token = CompletionToken::new();
        assert!(token.fail_cancelled());
        let cause = token.failure().expect("failure recorded");
        assert_eq!(cause.code(), codes::TASK_CANCELLED);
    }
}
