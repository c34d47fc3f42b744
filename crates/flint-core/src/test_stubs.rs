//! 官方维护的测试桩集合。
//!
//! ## 模块目标（Why）
//! - 集中维护传输与处理器的常用桩实现，避免各处测试重复定义；
//! - 核心契约演进时单点更新，保证所有测试同步适配。
//!
//! ## 使用方式（How）
//! - `use flint_core::test_stubs::*;` 引入需要的桩类型；
//! - 桩对象全部持有共享内部状态的句柄克隆，便于在通道取得所有权后
//!   仍能从测试侧观察行为。

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::buffer::{BufferHolder, BufferKind};
use crate::error::CoreError;
use crate::pipeline::{Handler, HandlerContext, UserEvent};
use crate::transport::{Transport, unsupported_operation};

/// 内存传输桩：记录连接状态与被冲刷的字节。
#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryTransportState>>,
}

#[derive(Debug, Default)]
struct MemoryTransportState {
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    flushed: Vec<u8>,
    closed: bool,
}

impl MemoryTransport {
    /// 创建空白的内存传输。
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置本地地址。
    pub fn with_local(local: SocketAddr) -> Self {
        let transport = Self::default();
        transport.lock().local = Some(local);
        transport
    }

    /// 读取累计被冲刷的字节。
    pub fn flushed(&self) -> Vec<u8> {
        self.lock().flushed.clone()
    }

    /// 是否处于连接状态。
    pub fn is_connected(&self) -> bool {
        self.lock().remote.is_some()
    }

    /// 底层是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryTransportState> {
        self.state.lock().expect("memory-transport state lock poisoned")
    }
}

impl Transport for MemoryTransport {
    fn do_connect(
        &mut self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> crate::Result<(), CoreError> {
        let mut state = self.lock();
        state.remote = Some(remote);
        if local.is_some() {
            state.local = local;
        }
        Ok(())
    }

    fn do_disconnect(&mut self) -> crate::Result<(), CoreError> {
        self.lock().remote = None;
        Ok(())
    }

    fn do_flush(&mut self, outbound: &mut BufferHolder) -> crate::Result<(), CoreError> {
        if let Some(bytes) = outbound.take_bytes() {
            self.lock().flushed.extend_from_slice(&bytes);
        }
        Ok(())
    }

    fn do_close(&mut self) -> crate::Result<(), CoreError> {
        let mut state = self.lock();
        state.remote = None;
        state.closed = true;
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.lock().remote
    }
}

/// 服务端传输桩：连接类能力一律以"不支持"拒绝。
#[derive(Clone, Debug, Default)]
pub struct ServerStubTransport {
    local: Option<SocketAddr>,
}

impl ServerStubTransport {
    /// 创建未绑定地址的服务端桩。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以监听地址创建服务端桩。
    pub fn bound(local: SocketAddr) -> Self {
        Self { local: Some(local) }
    }
}

impl Transport for ServerStubTransport {
    fn do_connect(
        &mut self,
        _remote: SocketAddr,
        _local: Option<SocketAddr>,
    ) -> crate::Result<(), CoreError> {
        Err(unsupported_operation("connect"))
    }

    fn do_disconnect(&mut self) -> crate::Result<(), CoreError> {
        Err(unsupported_operation("disconnect"))
    }

    fn do_flush(&mut self, _outbound: &mut BufferHolder) -> crate::Result<(), CoreError> {
        Err(unsupported_operation("flush"))
    }

    fn do_close(&mut self) -> crate::Result<(), CoreError> {
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// 事件记录处理器：把生命周期事件按序写入共享日志，数据路径走默认透传。
pub struct RecordingHandler {
    label: Cow<'static, str>,
    inbound: BufferKind,
    outbound: BufferKind,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingHandler {
    /// 创建字节/字节形态的记录器，返回（处理器，日志句柄）。
    pub fn new(label: impl Into<Cow<'static, str>>) -> (Self, Arc<Mutex<Vec<String>>>) {
        Self::with_kinds(label, BufferKind::Bytes, BufferKind::Bytes)
    }

    /// 以指定缓冲种类创建记录器。
    pub fn with_kinds(
        label: impl Into<Cow<'static, str>>,
        inbound: BufferKind,
        outbound: BufferKind,
    ) -> (Self, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = Self::sharing(label, inbound, outbound, Arc::clone(&log));
        (handler, log)
    }

    /// 多个记录器共享同一份日志时使用，便于断言跨节点的事件次序。
    pub fn sharing(
        label: impl Into<Cow<'static, str>>,
        inbound: BufferKind,
        outbound: BufferKind,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            label: label.into(),
            inbound,
            outbound,
            log,
        }
    }

    fn record(&self, entry: String) {
        self.log.lock().expect("recording-handler log lock poisoned").push(entry);
    }
}

impl Handler for RecordingHandler {
    fn label(&self) -> Cow<'static, str> {
        self.label.clone()
    }

    fn inbound_kind(&self) -> BufferKind {
        self.inbound
    }

    fn outbound_kind(&self) -> BufferKind {
        self.outbound
    }

    fn on_channel_active(&mut self, ctx: &mut HandlerContext<'_>) {
        self.record(format!("{}:active", self.label));
        ctx.fire_channel_active_next();
    }

    fn on_channel_inactive(&mut self, ctx: &mut HandlerContext<'_>) {
        self.record(format!("{}:inactive", self.label));
        ctx.fire_channel_inactive_next();
    }

    fn on_exception_caught(&mut self, ctx: &mut HandlerContext<'_>, error: CoreError) {
        self.record(format!(
            "{}:exception:{}:{}",
            self.label,
            error.code(),
            error.message()
        ));
        ctx.fire_exception_next(error);
    }

    fn on_user_event(&mut self, ctx: &mut HandlerContext<'_>, event: UserEvent) {
        self.record(format!("{}:user", self.label));
        ctx.fire_user_event_next(event);
    }
}
