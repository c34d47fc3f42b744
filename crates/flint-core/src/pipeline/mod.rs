//! 处理器流水线与节点上下文。
//!
//! ## 模块目标（Why）
//! - 将一条通道上的入站/出站数据流组织为有序处理器链：入站字节自头向尾
//!   上行，出站消息自尾向头下行，最终字节落入通道出站缓冲；
//! - 生命周期事件（活跃、非活跃、异常、用户事件）沿入站链路各广播一次。
//!
//! ## 实现策略（How）
//! - 流水线持有节点竞技场（`Vec<Slot>`），上下文以下标寻址邻居，
//!   从结构上消除节点与流水线之间的循环强引用；
//! - 触发某节点时把处理器从槽位暂时取出，再借上下文访问流水线其余
//!   部分，借用检查因此保持完全安全；
//! - 节点数据回调返回错误时，就地转换为该节点的异常事件并沿链路传播；
//!   无人处置的异常在尾部记录日志。
//!
//! ## 风险提示（Trade-offs）
//! - 触发原语按链路深度递归，深度等于节点数，常规装配（个位数节点）
//!   下栈深可忽略；
//! - 相邻节点缓冲种类的兼容性在运行期检查，这是动态装配的代价。

mod handler;

pub use handler::{Handler, UserEvent};

use std::borrow::Cow;
use std::collections::VecDeque;

use crate::buffer::{BufferHolder, PipelineMessage};
use crate::error::CoreError;

/// 流水线节点槽位：处理器本体与两个方向的输入缓冲。
struct Slot {
    handler: Option<Box<dyn Handler>>,
    label: Cow<'static, str>,
    inbound: BufferHolder,
    outbound: BufferHolder,
}

/// `Pipeline` 是一条通道的有序处理器链。
///
/// # 契约说明（What）
/// - [`feed_inbound`](Pipeline::feed_inbound)：通道入站字节的唯一入口，
///   写入头节点缓冲并触发之；
/// - [`write_outbound`](Pipeline::write_outbound)：应用写入的唯一入口，
///   进入尾节点并向头方向下行，最终落入出站汇聚缓冲；
/// - 穿越整条入站链路的消息停靠在尾部队列，由
///   [`drain_received`](Pipeline::drain_received) 交给应用；
/// - 所有方法都假定在通道所属事件循环线程上调用。
pub struct Pipeline {
    channel_id: u64,
    slots: Vec<Slot>,
    outbound_sink: BufferHolder,
    received: VecDeque<PipelineMessage>,
}

impl Pipeline {
    /// 创建出站汇聚为字节缓冲的流水线（客户端通道形态）。
    pub fn new(channel_id: u64) -> Self {
        Self::with_sink(channel_id, BufferHolder::Bytes(bytes::BytesMut::new()))
    }

    /// 创建出站汇聚为丢弃哨兵的流水线（服务端通道形态）。
    pub fn with_discard_sink(channel_id: u64) -> Self {
        Self::with_sink(channel_id, BufferHolder::discard())
    }

    fn with_sink(channel_id: u64, outbound_sink: BufferHolder) -> Self {
        Self {
            channel_id,
            slots: Vec::new(),
            outbound_sink,
            received: VecDeque::new(),
        }
    }

    /// 所属通道标识。
    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    /// 在链路尾部追加处理器，按声明的缓冲种类分配上下文缓冲。
    pub fn add_last(&mut self, handler: impl Handler) -> &mut Self {
        let inbound = BufferHolder::for_kind(handler.inbound_kind());
        let outbound = BufferHolder::for_kind(handler.outbound_kind());
        let label = handler.label();
        self.slots.push(Slot {
            handler: Some(Box::new(handler)),
            label,
            inbound,
            outbound,
        });
        self
    }

    /// 返回链路快照：处理器标签按执行顺序排列。
    pub fn labels(&self) -> Vec<Cow<'static, str>> {
        self.slots.iter().map(|slot| slot.label.clone()).collect()
    }

    /// 注入入站字节：写入头节点缓冲并触发入站链路。
    pub fn feed_inbound(&mut self, bytes: &[u8]) -> crate::Result<(), CoreError> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.slots.is_empty() {
            self.received.push_back(PipelineMessage::Buffer(
                bytes::Bytes::copy_from_slice(bytes),
            ));
            return Ok(());
        }
        self.slots[0].inbound.extend_bytes(bytes)?;
        self.run_inbound(0);
        Ok(())
    }

    /// 应用写入：进入尾节点出站缓冲并触发出站链路。
    pub fn write_outbound(&mut self, message: PipelineMessage) -> crate::Result<(), CoreError> {
        match self.slots.len() {
            0 => self.outbound_sink.push(message),
            len => {
                self.slots[len - 1].outbound.push(message)?;
                self.run_outbound(len - 1);
                Ok(())
            }
        }
    }

    /// 取走穿越整条入站链路抵达尾部的消息。
    pub fn drain_received(&mut self) -> Vec<PipelineMessage> {
        self.received.drain(..).collect()
    }

    /// 以可变方式访问出站汇聚缓冲，供通道冲刷时取走字节。
    pub fn outbound_sink_mut(&mut self) -> &mut BufferHolder {
        &mut self.outbound_sink
    }

    /// 广播"通道活跃"事件。
    pub fn fire_channel_active(&mut self) {
        self.run_active(0);
    }

    /// 广播"通道非活跃"事件。
    pub fn fire_channel_inactive(&mut self) {
        self.run_inactive(0);
    }

    /// 从链路头部注入异常事件。
    pub fn fire_exception(&mut self, error: CoreError) {
        self.run_exception(0, error);
    }

    /// 从链路头部广播用户事件。
    pub fn fire_user_event(&mut self, event: UserEvent) {
        self.run_user(0, event);
    }

    fn run_inbound(&mut self, index: usize) {
        let Some(mut handler) = self.take_handler(index) else {
            return;
        };
        let result = handler.on_inbound(&mut HandlerContext {
            pipeline: &mut *self,
            index,
        });
        self.slots[index].handler = Some(handler);
        if let Err(error) = result {
            // 异常事件从出错节点的下一个节点开始传播，出错者不观察自身失败。
            self.run_exception(index + 1, error);
        }
    }

    fn run_outbound(&mut self, index: usize) {
        let Some(mut handler) = self.take_handler(index) else {
            return;
        };
        let result = handler.on_outbound(&mut HandlerContext {
            pipeline: &mut *self,
            index,
        });
        self.slots[index].handler = Some(handler);
        if let Err(error) = result {
            self.run_exception(index + 1, error);
        }
    }

    fn run_active(&mut self, index: usize) {
        let Some(mut handler) = self.take_handler(index) else {
            return;
        };
        handler.on_channel_active(&mut HandlerContext {
            pipeline: &mut *self,
            index,
        });
        self.slots[index].handler = Some(handler);
    }

    fn run_inactive(&mut self, index: usize) {
        let Some(mut handler) = self.take_handler(index) else {
            return;
        };
        handler.on_channel_inactive(&mut HandlerContext {
            pipeline: &mut *self,
            index,
        });
        self.slots[index].handler = Some(handler);
    }

    fn run_exception(&mut self, index: usize, error: CoreError) {
        if index >= self.slots.len() {
            tracing::error!(
                channel_id = self.channel_id,
                code = error.code(),
                message = error.message(),
                "exception reached pipeline tail unhandled"
            );
            return;
        }
        let Some(mut handler) = self.take_handler(index) else {
            // 节点正在执行中，跳过它继续向尾部传播。
            self.run_exception(index + 1, error);
            return;
        };
        handler.on_exception_caught(
            &mut HandlerContext {
                pipeline: &mut *self,
                index,
            },
            error,
        );
        self.slots[index].handler = Some(handler);
    }

    fn run_user(&mut self, index: usize, event: UserEvent) {
        if index >= self.slots.len() {
            tracing::debug!(channel_id = self.channel_id, "user event reached pipeline tail");
            return;
        }
        let Some(mut handler) = self.take_handler(index) else {
            self.run_user(index + 1, event);
            return;
        };
        handler.on_user_event(
            &mut HandlerContext {
                pipeline: &mut *self,
                index,
            },
            event,
        );
        self.slots[index].handler = Some(handler);
    }

    fn take_handler(&mut self, index: usize) -> Option<Box<dyn Handler>> {
        let slot = self.slots.get_mut(index)?;
        let taken = slot.handler.take();
        if taken.is_none() {
            tracing::debug!(
                channel_id = self.channel_id,
                index,
                "handler re-entered while already running; dispatch skipped"
            );
        }
        taken
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("channel_id", &self.channel_id)
            .field("handlers", &self.slots.len())
            .field("received", &self.received.len())
            .finish()
    }
}

/// `HandlerContext` 是处理器在一次触发中看到的流水线视图。
///
/// # 契约说明（What）
/// - 上下文仅在回调栈帧内有效，处理器不得把它保存到回调之外；
/// - `forward_*` / `write_*_next` 负责搬运内容，`fire_*` 负责唤醒邻居；
/// - 入站方向的"下一个"是更靠尾的节点，出站方向的"下一个"是更靠头的
///   节点，越过头部的出站内容落入通道出站汇聚缓冲。
pub struct HandlerContext<'a> {
    pipeline: &'a mut Pipeline,
    index: usize,
}

impl HandlerContext<'_> {
    /// 所属通道标识。
    pub fn channel_id(&self) -> u64 {
        self.pipeline.channel_id
    }

    /// 当前节点的入站输入缓冲。
    pub fn inbound(&mut self) -> &mut BufferHolder {
        &mut self.pipeline.slots[self.index].inbound
    }

    /// 当前节点的出站输入缓冲。
    pub fn outbound(&mut self) -> &mut BufferHolder {
        &mut self.pipeline.slots[self.index].outbound
    }

    /// 把一条消息写入下一个入站节点的缓冲；尾部时停靠到应用队列。
    pub fn write_inbound_next(&mut self, message: PipelineMessage) -> crate::Result<(), CoreError> {
        let next = self.index + 1;
        if next < self.pipeline.slots.len() {
            self.pipeline.slots[next].inbound.push(message)
        } else {
            self.pipeline.received.push_back(message);
            Ok(())
        }
    }

    /// 触发下一个入站节点。
    pub fn fire_inbound_next(&mut self) -> crate::Result<(), CoreError> {
        let next = self.index + 1;
        if next < self.pipeline.slots.len() {
            self.pipeline.run_inbound(next);
        }
        Ok(())
    }

    /// 把本节点入站缓冲的全部内容搬运给下一个入站节点。
    pub fn forward_inbound(&mut self) -> crate::Result<(), CoreError> {
        let index = self.index;
        let Pipeline {
            slots, received, ..
        } = &mut *self.pipeline;
        if index + 1 < slots.len() {
            let (left, right) = slots.split_at_mut(index + 1);
            left[index].inbound.drain_into(&mut right[0].inbound)
        } else {
            match &mut slots[index].inbound {
                BufferHolder::Bytes(buf) if !buf.is_empty() => {
                    received.push_back(PipelineMessage::Buffer(buf.split().freeze()));
                    Ok(())
                }
                BufferHolder::Messages(queue) => {
                    while let Some(message) = queue.pop_front() {
                        received.push_back(message);
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    /// 把一条消息写入下一个出站节点的缓冲；越过头部时落入汇聚缓冲。
    pub fn write_outbound_next(
        &mut self,
        message: PipelineMessage,
    ) -> crate::Result<(), CoreError> {
        if self.index == 0 {
            self.pipeline.outbound_sink.push(message)
        } else {
            self.pipeline.slots[self.index - 1].outbound.push(message)
        }
    }

    /// 触发下一个出站节点。
    pub fn fire_outbound_next(&mut self) -> crate::Result<(), CoreError> {
        if self.index > 0 {
            self.pipeline.run_outbound(self.index - 1);
        }
        Ok(())
    }

    /// 把本节点出站缓冲的全部内容搬运给下一个出站节点。
    pub fn forward_outbound(&mut self) -> crate::Result<(), CoreError> {
        let index = self.index;
        let Pipeline {
            slots,
            outbound_sink,
            ..
        } = &mut *self.pipeline;
        if index == 0 {
            slots[0].outbound.drain_into(outbound_sink)
        } else {
            let (left, right) = slots.split_at_mut(index);
            right[0].outbound.drain_into(&mut left[index - 1].outbound)
        }
    }

    /// 向下一个入站节点传递"通道活跃"事件。
    pub fn fire_channel_active_next(&mut self) {
        self.pipeline.run_active(self.index + 1);
    }

    /// 向下一个入站节点传递"通道非活跃"事件。
    pub fn fire_channel_inactive_next(&mut self) {
        self.pipeline.run_inactive(self.index + 1);
    }

    /// 向下一个入站节点传播异常事件。
    pub fn fire_exception_next(&mut self, error: CoreError) {
        self.pipeline.run_exception(self.index + 1, error);
    }

    /// 向下一个入站节点广播用户事件。
    pub fn fire_user_event_next(&mut self, event: UserEvent) {
        self.pipeline.run_user(self.index + 1, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferKind;

    /// 双向字节透传节点，走 trait 的默认数据路径。
    struct Passthrough;

    impl Handler for Passthrough {
        fn label(&self) -> Cow<'static, str> {
            Cow::Borrowed("passthrough")
        }

        fn inbound_kind(&self) -> BufferKind {
            BufferKind::Bytes
        }

        fn outbound_kind(&self) -> BufferKind {
            BufferKind::Bytes
        }
    }

    #[test]
    fn inbound_bytes_traverse_to_tail() {
        // Why: 默认数据路径必须把头节点收到的字节原样送达尾部队列。
        let mut pipeline = Pipeline::new(1);
        pipeline.add_last(Passthrough).add_last(Passthrough);
        pipeline.feed_inbound(b"hello").expect("feed");
        let received = pipeline.drain_received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].as_buffer().expect("buffer").as_ref(), b"hello");
    }

    #[test]
    fn outbound_bytes_descend_into_sink() {
        let mut pipeline = Pipeline::new(2);
        pipeline.add_last(Passthrough).add_last(Passthrough);
        pipeline
            .write_outbound(PipelineMessage::Buffer(bytes::Bytes::from_static(b"out")))
            .expect("write");
        let bytes = pipeline
            .outbound_sink_mut()
            .take_bytes()
            .expect("sink holds bytes");
        assert_eq!(bytes.as_ref(), b"out");
    }

    #[test]
    fn empty_pipeline_short_circuits_both_directions() {
        let mut pipeline = Pipeline::new(3);
        pipeline.feed_inbound(b"in").expect("feed");
        pipeline
            .write_outbound(PipelineMessage::Buffer(bytes::Bytes::from_static(b"out")))
            .expect("write");
        assert_eq!(pipeline.drain_received().len(), 1);
        assert_eq!(
            pipeline
                .outbound_sink_mut()
                .take_bytes()
                .expect("bytes")
                .as_ref(),
            b"out"
        );
    }

    #[test]
    fn handler_error_becomes_exception_event() {
        // How: 数据回调返回错误时，应转换为异常事件并送达后续节点。
        use std::sync::{Arc, Mutex};

        struct Failing;
        impl Handler for Failing {
            fn inbound_kind(&self) -> BufferKind {
                BufferKind::Bytes
            }
            fn outbound_kind(&self) -> BufferKind {
                BufferKind::Bytes
            }
            fn on_inbound(
                &mut self,
                _ctx: &mut HandlerContext<'_>,
            ) -> crate::Result<(), CoreError> {
                Err(CoreError::new(
                    crate::error::codes::PROTOCOL_DECODE,
                    "broken input",
                ))
            }
        }

        struct Observer {
            seen: Arc<Mutex<Vec<&'static str>>>,
        }
        impl Handler for Observer {
            fn inbound_kind(&self) -> BufferKind {
                BufferKind::Bytes
            }
            fn outbound_kind(&self) -> BufferKind {
                BufferKind::Bytes
            }
            fn on_exception_caught(&mut self, _ctx: &mut HandlerContext<'_>, error: CoreError) {
                self.seen.lock().expect("seen lock").push(error.code());
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(4);
        pipeline.add_last(Failing).add_last(Observer {
            seen: Arc::clone(&seen),
        });
        pipeline.feed_inbound(b"x").expect("feed");
        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec![crate::error::codes::PROTOCOL_DECODE]
        );
    }

    #[test]
    fn failed_handler_does_not_observe_its_own_error() {
        // Why: 异常事件从出错节点的下一个节点开始传播；即便出错者自己
        //      覆写了异常回调，也不得先于下游观察到自身失败。
        use std::sync::{Arc, Mutex};

        struct FailingObserver {
            seen: Arc<Mutex<Vec<&'static str>>>,
        }
        impl Handler for FailingObserver {
            fn inbound_kind(&self) -> BufferKind {
                BufferKind::Bytes
            }
            fn outbound_kind(&self) -> BufferKind {
                BufferKind::Bytes
            }
            fn on_inbound(
                &mut self,
                _ctx: &mut HandlerContext<'_>,
            ) -> crate::Result<(), CoreError> {
                Err(CoreError::new(
                    crate::error::codes::PROTOCOL_DECODE,
                    "broken input",
                ))
            }
            fn on_exception_caught(&mut self, ctx: &mut HandlerContext<'_>, error: CoreError) {
                self.seen.lock().expect("seen lock").push("failing");
                ctx.fire_exception_next(error);
            }
        }

        struct Downstream {
            seen: Arc<Mutex<Vec<&'static str>>>,
        }
        impl Handler for Downstream {
            fn inbound_kind(&self) -> BufferKind {
                BufferKind::Bytes
            }
            fn outbound_kind(&self) -> BufferKind {
                BufferKind::Bytes
            }
            fn on_exception_caught(&mut self, _ctx: &mut HandlerContext<'_>, _error: CoreError) {
                self.seen.lock().expect("seen lock").push("downstream");
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(6);
        pipeline
            .add_last(FailingObserver {
                seen: Arc::clone(&seen),
            })
            .add_last(Downstream {
                seen: Arc::clone(&seen),
            });
        pipeline.feed_inbound(b"x").expect("feed");
        assert_eq!(*seen.lock().expect("seen lock"), vec!["downstream"]);
    }

    #[test]
    fn labels_snapshot_follows_execution_order() {
        let mut pipeline = Pipeline::new(5);
        pipeline.add_last(Passthrough).add_last(Passthrough);
        let labels = pipeline.labels();
        assert_eq!(labels, vec!["passthrough", "passthrough"]);
    }
}
