use std::any::Any;
use std::borrow::Cow;

use crate::buffer::BufferKind;
use crate::error::CoreError;

use super::HandlerContext;

/// 用户自定义事件的类型擦除载体。
///
/// # 契约说明（What）
/// - 事件沿入站链路从头到尾广播一次；
/// - 消费方通过 [`UserEvent::downcast_ref`] 判定自身关心的事件类型，
///   不关心时原样转发。
pub struct UserEvent(Box<dyn Any + Send>);

impl UserEvent {
    /// 包装任意业务事件。
    pub fn new<T: Any + Send>(event: T) -> Self {
        Self(Box::new(event))
    }

    /// 以只读方式访问指定类型的事件负载。
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for UserEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UserEvent").field(&"<erased-event>").finish()
    }
}

/// `Handler` 是流水线节点的全双工处理契约。
///
/// # 设计背景（Why）
/// - 入站字节自头向尾上行、出站消息自尾向头下行，编解码器往往需要同时
///   参与两个方向；以单一全双工 trait 表达，避免为每个节点装配两份上下文。
/// - 每个处理器显式声明两个方向的输入缓冲种类，流水线据此为其上下文
///   分配匹配的 [`BufferHolder`] 变体。
///
/// # 契约说明（What）
/// - 所有方法都在通道所属事件循环线程上被调用，实现内部不得阻塞：
///   要么消费自身缓冲中已有的内容，要么直接返回等待下一次触发；
/// - `on_inbound`/`on_outbound` 返回错误时，流水线将其转换为沿入站链路
///   传播的异常事件；
/// - 四个事件方法的默认实现原样向后传递，保证事件恰好走完链路一次。
///
/// # 风险提示（Trade-offs）
/// - 默认的数据方法做整缓冲透传，种类不匹配的相邻节点会在运行期暴露
///   `pipeline.kind_mismatch`；装配期不做静态校验是动态装配的代价。
pub trait Handler: Send + 'static {
    /// 处理器标签，用于日志与链路快照。
    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("anonymous")
    }

    /// 入站方向的输入缓冲种类。
    fn inbound_kind(&self) -> BufferKind;

    /// 出站方向的输入缓冲种类。
    fn outbound_kind(&self) -> BufferKind;

    /// 入站缓冲出现新内容时触发。
    fn on_inbound(&mut self, ctx: &mut HandlerContext<'_>) -> crate::Result<(), CoreError> {
        ctx.forward_inbound()?;
        ctx.fire_inbound_next()
    }

    /// 出站缓冲出现新内容时触发。
    fn on_outbound(&mut self, ctx: &mut HandlerContext<'_>) -> crate::Result<(), CoreError> {
        ctx.forward_outbound()?;
        ctx.fire_outbound_next()
    }

    /// 通道变为活跃。
    fn on_channel_active(&mut self, ctx: &mut HandlerContext<'_>) {
        ctx.fire_channel_active_next();
    }

    /// 通道变为非活跃。
    fn on_channel_inactive(&mut self, ctx: &mut HandlerContext<'_>) {
        ctx.fire_channel_inactive_next();
    }

    /// 链路上游捕获到异常。
    fn on_exception_caught(&mut self, ctx: &mut HandlerContext<'_>, error: CoreError) {
        ctx.fire_exception_next(error);
    }

    /// 收到用户自定义事件。
    fn on_user_event(&mut self, ctx: &mut HandlerContext<'_>, event: UserEvent) {
        ctx.fire_user_event_next(event);
    }
}
