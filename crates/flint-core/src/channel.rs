//! 通道：绑定单一事件循环的双向传输端点。
//!
//! ## 模块目标（Why）
//! - 对上层暴露统一的生命周期操作（注册、连接、断开、冲刷、关闭、写入），
//!   所有操作都以完成令牌异步收敛，真正的执行发生在通道所属的事件循环线程上；
//! - 服务端通道以"不支持"桩传输与丢弃型出站缓冲表达操作限制，
//!   流水线 API 因此保持完全统一。
//!
//! ## 实现策略（How）
//! - 公共操作被编码为带标签的操作变体：调用发生在循环线程上则内联执行，
//!   否则连同令牌一起投递到循环队列，与其余循环工作严格串行；
//! - 易变状态（传输能力记录、流水线、活跃位）集中在一个状态单元中，
//!   仅在循环线程上被触碰，互斥锁只为满足 `Sync` 而存在、几乎无争用。
//!
//! ## 风险提示（Trade-offs）
//! - 处理器回调内不得同步调用本通道的公共操作：回调栈已持有状态单元锁，
//!   内联执行将自死锁。需要级联操作时应通过事件循环 `execute` 延后一拍。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::buffer::PipelineMessage;
use crate::error::{CoreError, codes};
use crate::executor::EventLoop;
use crate::pipeline::Pipeline;
use crate::tally::{InstanceTally, TallyGuard};
use crate::token::CompletionToken;
use crate::transport::Transport;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// `Channel` 是通道的可克隆句柄。
///
/// # 契约说明（What）
/// - 每个未关闭的通道恰好绑定一个事件循环，绑定在
///   [`register`](Channel::register) 中一次性完成；
/// - 全部生命周期操作返回 [`CompletionToken`]，并保证在循环线程上完成；
/// - [`close`](Channel::close) 幂等，且在流水线观察到"通道非活跃"事件
///   之后才完成令牌。
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    id: u64,
    parent_id: Option<u64>,
    server: bool,
    event_loop: Mutex<Option<EventLoop>>,
    closed: AtomicBool,
    core: Mutex<ChannelCore>,
    _tally: TallyGuard,
}

struct ChannelCore {
    transport: Box<dyn Transport>,
    pipeline: Pipeline,
    active: bool,
}

/// 跨线程投递的通道操作变体。
enum ChannelOp {
    Register,
    Connect {
        remote: SocketAddr,
        local: Option<SocketAddr>,
    },
    Disconnect,
    Flush,
    Close,
    Write(PipelineMessage),
    FeedRead(Bytes),
}

impl Channel {
    /// 创建客户端形态的通道：出站汇聚为字节缓冲。
    pub fn new(transport: impl Transport) -> Self {
        Self::build(transport, None, false)
    }

    /// 创建服务端形态的通道：出站汇聚为丢弃哨兵。
    ///
    /// # 契约说明（What）
    /// - `connect`/`disconnect`/`flush` 由传输桩以
    ///   `channel.unsupported_operation` 拒绝，令牌失败的同时向流水线
    ///   发射一次异常事件；
    /// - 注册成功即视为活跃（监听端无连接语义）。
    pub fn server(transport: impl Transport) -> Self {
        Self::build(transport, None, true)
    }

    /// 创建由 `parent` 派生的子通道（例如监听端接受的连接）。
    pub fn child(parent: &Channel, transport: impl Transport) -> Self {
        Self::build(transport, Some(parent.id()), false)
    }

    fn build(transport: impl Transport, parent_id: Option<u64>, server: bool) -> Self {
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::AcqRel);
        let pipeline = if server {
            Pipeline::with_discard_sink(id)
        } else {
            Pipeline::new(id)
        };
        Self {
            inner: Arc::new(ChannelInner {
                id,
                parent_id,
                server,
                event_loop: Mutex::new(None),
                closed: AtomicBool::new(false),
                core: Mutex::new(ChannelCore {
                    transport: Box::new(transport),
                    pipeline,
                    active: false,
                }),
                _tally: InstanceTally::acquire("flint.channel"),
            }),
        }
    }

    /// 进程内唯一的通道标识。
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// 派生来源通道的标识；顶层通道为 `None`。
    pub fn parent_id(&self) -> Option<u64> {
        self.inner.parent_id
    }

    /// 是否为服务端形态。
    pub fn is_server(&self) -> bool {
        self.inner.server
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 已绑定的事件循环；注册前为 `None`。
    pub fn event_loop(&self) -> Option<EventLoop> {
        self.inner
            .event_loop
            .lock()
            .expect("channel event-loop slot lock poisoned")
            .clone()
    }

    /// 本地地址；未绑定时为 `None`。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_core().transport.local_addr()
    }

    /// 远端地址；未连接时为 `None`。
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.lock_core().transport.remote_addr()
    }

    /// 在装配阶段（或循环线程上）直接操作流水线。
    ///
    /// # 契约说明（What）
    /// - 注册并开始收发之后，只允许从循环线程调用，以维持单线程触碰约定。
    pub fn with_pipeline<R>(&self, f: impl FnOnce(&mut Pipeline) -> R) -> R {
        f(&mut self.lock_core().pipeline)
    }

    /// 将通道一次性绑定到事件循环。
    ///
    /// # 契约说明（What）
    /// - 重复注册令牌以 `channel.already_registered` 失败；
    /// - 服务端通道在注册完成时发射"通道活跃"事件。
    pub fn register(&self, event_loop: &EventLoop) -> CompletionToken {
        let token = CompletionToken::new();
        {
            let mut slot = self
                .inner
                .event_loop
                .lock()
                .expect("channel event-loop slot lock poisoned");
            if slot.is_some() {
                token.fail(CoreError::new(
                    codes::CHANNEL_ALREADY_REGISTERED,
                    format!("channel #{} is already bound to an event loop", self.inner.id),
                ));
                return token;
            }
            *slot = Some(event_loop.clone());
        }
        self.dispatch(ChannelOp::Register, token.clone());
        token
    }

    /// 建立到远端的连接；服务端通道上必然失败。
    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> CompletionToken {
        self.submit(ChannelOp::Connect { remote, local })
    }

    /// 断开连接；服务端通道上必然失败。
    pub fn disconnect(&self) -> CompletionToken {
        self.submit(ChannelOp::Disconnect)
    }

    /// 将出站汇聚缓冲中的字节冲刷到传输；服务端通道上必然失败。
    pub fn flush(&self) -> CompletionToken {
        self.submit(ChannelOp::Flush)
    }

    /// 幂等关闭：流水线观察到非活跃事件后完成令牌。
    pub fn close(&self) -> CompletionToken {
        self.submit(ChannelOp::Close)
    }

    /// 应用写入：消息进入流水线尾部并向头方向下行。
    pub fn write(&self, message: PipelineMessage) -> CompletionToken {
        self.submit(ChannelOp::Write(message))
    }

    /// 传输就绪回调入口：入站字节送入流水线头部。
    pub fn feed_read(&self, bytes: Bytes) -> CompletionToken {
        self.submit(ChannelOp::FeedRead(bytes))
    }

    fn submit(&self, op: ChannelOp) -> CompletionToken {
        let token = CompletionToken::new();
        self.dispatch(op, token.clone());
        token
    }

    /// 执行纪律：循环线程内联执行，否则投递到循环队列。
    fn dispatch(&self, op: ChannelOp, token: CompletionToken) {
        let bound = self
            .inner
            .event_loop
            .lock()
            .expect("channel event-loop slot lock poisoned")
            .clone();
        let Some(event_loop) = bound else {
            token.fail(CoreError::new(
                codes::CHANNEL_NOT_REGISTERED,
                format!("channel #{} is not registered to an event loop", self.inner.id),
            ));
            return;
        };
        if event_loop.in_event_loop() {
            run_op(&self.inner, op, &token);
        } else {
            let inner = Arc::clone(&self.inner);
            let remote = token.clone();
            if let Err(error) = event_loop.execute(move || run_op(&inner, op, &remote)) {
                token.fail(error);
            }
        }
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, ChannelCore> {
        self.inner.core.lock().expect("channel core lock poisoned")
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("server", &self.inner.server)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn closed_error(id: u64) -> CoreError {
    CoreError::new(codes::CHANNEL_CLOSED, format!("channel #{id} is closed"))
}

/// 在循环线程上执行一条通道操作并完成令牌。
fn run_op(inner: &Arc<ChannelInner>, op: ChannelOp, token: &CompletionToken) {
    let mut core = inner.core.lock().expect("channel core lock poisoned");
    match op {
        ChannelOp::Register => {
            if inner.server {
                core.active = true;
                core.pipeline.fire_channel_active();
            }
            token.succeed();
        }
        ChannelOp::Connect { remote, local } => {
            if inner.closed.load(Ordering::Acquire) {
                token.fail(closed_error(inner.id));
                return;
            }
            match core.transport.do_connect(remote, local) {
                Ok(()) => {
                    core.active = true;
                    core.pipeline.fire_channel_active();
                    token.succeed();
                }
                Err(error) => {
                    core.pipeline.fire_exception(error.clone());
                    token.fail(error);
                }
            }
        }
        ChannelOp::Disconnect => match core.transport.do_disconnect() {
            Ok(()) => {
                if core.active {
                    core.active = false;
                    core.pipeline.fire_channel_inactive();
                }
                token.succeed();
            }
            Err(error) => {
                core.pipeline.fire_exception(error.clone());
                token.fail(error);
            }
        },
        ChannelOp::Flush => {
            let ChannelCore {
                transport,
                pipeline,
                ..
            } = &mut *core;
            match transport.do_flush(pipeline.outbound_sink_mut()) {
                Ok(()) => {
                    token.succeed();
                }
                Err(error) => {
                    pipeline.fire_exception(error.clone());
                    token.fail(error);
                }
            }
        }
        ChannelOp::Close => {
            if inner.closed.swap(true, Ordering::AcqRel) {
                token.succeed();
                return;
            }
            let closed = core.transport.do_close();
            core.active = false;
            // 先让流水线观察到非活跃事件，再完成令牌。
            core.pipeline.fire_channel_inactive();
            match closed {
                Ok(()) => {
                    token.succeed();
                }
                Err(error) => {
                    token.fail(error);
                }
            }
        }
        ChannelOp::Write(message) => {
            if inner.closed.load(Ordering::Acquire) {
                token.fail(closed_error(inner.id));
                return;
            }
            match core.pipeline.write_outbound(message) {
                Ok(()) => {
                    token.succeed();
                }
                Err(error) => {
                    core.pipeline.fire_exception(error.clone());
                    token.fail(error);
                }
            }
        }
        ChannelOp::FeedRead(bytes) => match core.pipeline.feed_inbound(&bytes) {
            Ok(()) => {
                token.succeed();
            }
            Err(error) => {
                core.pipeline.fire_exception(error.clone());
                token.fail(error);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::MemoryTransport;
    use std::time::Duration;

    #[test]
    fn channel_ids_are_unique() {
        let a = Channel::new(MemoryTransport::new());
        let b = Channel::new(MemoryTransport::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn ops_before_registration_fail_with_stable_code() {
        // Why: 未绑定事件循环时操作无处执行，必须立刻以稳定错误码失败。
        let channel = Channel::new(MemoryTransport::new());
        let token = channel.flush();
        assert_eq!(
            token.failure().expect("failure").code(),
            codes::CHANNEL_NOT_REGISTERED
        );
    }

    #[test]
    fn double_registration_fails_second_token() {
        let event_loop = EventLoop::new("test-register");
        let channel = Channel::new(MemoryTransport::new());
        let first = channel.register(&event_loop);
        assert!(first.await_done(Duration::from_secs(2)));
        assert!(first.is_success());
        let second = channel.register(&event_loop);
        assert_eq!(
            second.failure().expect("failure").code(),
            codes::CHANNEL_ALREADY_REGISTERED
        );
        event_loop.shutdown();
        assert!(event_loop.await_termination(Duration::from_secs(2)));
    }

    #[test]
    fn child_channel_records_parent_id() {
        let parent = Channel::server(MemoryTransport::new());
        let child = Channel::child(&parent, MemoryTransport::new());
        assert_eq!(child.parent_id(), Some(parent.id()));
        assert!(!child.is_server());
    }
}
