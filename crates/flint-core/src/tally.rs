use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// 超过该在世实例数即发出误用告警。
pub const WARN_THRESHOLD: usize = 256;

/// `InstanceTally` 按类型统计共享资源的在世实例数。
///
/// # 设计背景（Why）
/// - 事件循环与通道属于重量级共享资源：每个事件循环绑定一个工作线程，
///   进程内实例数失控通常意味着调用方把"每连接一个循环"误用成了默认姿势。
/// - 以构造期传入的编译期标识串为键做计数，替代任何运行时反射。
///
/// # 逻辑解析（How）
/// - 进程级注册表懒初始化；同一标识串共享同一个计数器；
/// - [`InstanceTally::acquire`] 返回 RAII 守卫，析构时自动递减；
/// - 首次越过 [`WARN_THRESHOLD`] 时仅告警一次，避免日志风暴。
///
/// # 契约说明（What）
/// - **前置条件**：`kind` 必须为 `'static` 字符串，建议使用 `<crate>.<类型>` 形式；
/// - **后置条件**：计数恒等于对应守卫的在世数量。
pub struct InstanceTally;

impl InstanceTally {
    /// 登记一个新实例并返回守卫。
    pub fn acquire(kind: &'static str) -> TallyGuard {
        let state = tally_state(kind);
        let live = state.live.fetch_add(1, Ordering::AcqRel) + 1;
        if live > WARN_THRESHOLD && !state.warned.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                kind,
                live,
                threshold = WARN_THRESHOLD,
                "instance count crossed misuse threshold; \
                 shared resources of this kind are usually meant to be few"
            );
        }
        TallyGuard { state }
    }

    /// 查询某一类型当前的在世实例数。
    pub fn live(kind: &'static str) -> usize {
        tally_state(kind).live.load(Ordering::Acquire)
    }
}

/// 实例守卫：析构时递减所属类型的计数。
#[derive(Debug)]
pub struct TallyGuard {
    state: Arc<TallyState>,
}

impl Drop for TallyGuard {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
struct TallyState {
    live: AtomicUsize,
    warned: AtomicBool,
}

fn tally_state(kind: &'static str) -> Arc<TallyState> {
    static REGISTRY: OnceLock<Mutex<HashMap<&'static str, Arc<TallyState>>>> = OnceLock::new();
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().expect("instance-tally registry lock poisoned");
    Arc::clone(map.entry(kind).or_insert_with(|| {
        Arc::new(TallyState {
            live: AtomicUsize::new(0),
            warned: AtomicBool::new(false),
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_drop_restores_count() {
        // Why: 计数必须与守卫生命周期严格同步，否则误用告警会产生漂移。
        let before = InstanceTally::live("flint.test.guard");
        let guard = InstanceTally::acquire("flint.test.guard");
        assert_eq!(InstanceTally::live("flint.test.guard"), before + 1);
        drop(guard);
        assert_eq!(InstanceTally::live("flint.test.guard"), before);
    }

    #[test]
    fn kinds_are_counted_independently() {
        let _a = InstanceTally::acquire("flint.test.kind_a");
        assert_eq!(InstanceTally::live("flint.test.kind_b"), 0);
    }
}
