use std::sync::Arc;
use std::time::Instant;

/// 抽象可注入的单调时钟。
///
/// # 设计背景（Why）
/// - 事件循环的全部截止时间运算都依赖单调时间源；若直接调用系统时钟，
///   调度语义将无法在测试中被替换或观察。
/// - 通过 trait 注入时钟，生产环境使用 [`SystemClock`]，测试可注入自定义实现。
///
/// # 契约说明（What）
/// - `now` 必须单调不减；
/// - 实现需满足 `Send + Sync + 'static`，以便被事件循环与其工作线程共享。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前的单调时间点。
    fn now(&self) -> Instant;
}

/// 直接委托 [`Instant::now`] 的系统时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 返回默认时钟实例，供构建器在未显式注入时兜底。
pub(crate) fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
