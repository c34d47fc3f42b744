use std::net::SocketAddr;

use crate::buffer::BufferHolder;
use crate::error::{CoreError, codes};

/// `Transport` 是通道与具体传输实现之间的能力记录。
///
/// # 设计背景（Why）
/// - 通道本体不关心套接字、选择器等平台细节，只依赖一组以 trait 对象
///   注入的 `do_*` 能力函数；服务端通道通过提供"不支持"桩函数来表达
///   自身的操作限制，而无需另起类型层级。
///
/// # 契约说明（What）
/// - 所有 `do_*` 方法仅会在通道所属事件循环线程上被调用，因此实现
///   无需内部加锁；
/// - `do_flush` 接收通道出站缓冲，实现应取走其中字节并写向底层传输；
/// - 地址访问器在未知时返回 `None`。
///
/// # 风险提示（Trade-offs）
/// - 能力记录不区分"客户端/服务端"类型，误把服务端传输装配到客户端
///   通道会把拒绝语义一并带过去；装配代码应以构造函数为准。
pub trait Transport: Send + 'static {
    /// 建立到远端地址的连接，可选绑定本地地址。
    fn do_connect(
        &mut self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> crate::Result<(), CoreError>;

    /// 断开当前连接。
    fn do_disconnect(&mut self) -> crate::Result<(), CoreError>;

    /// 将出站缓冲中的字节写向底层传输。
    fn do_flush(&mut self, outbound: &mut BufferHolder) -> crate::Result<(), CoreError>;

    /// 关闭底层传输并释放资源。
    fn do_close(&mut self) -> crate::Result<(), CoreError>;

    /// 本地地址；未绑定时为 `None`。
    fn local_addr(&self) -> Option<SocketAddr>;

    /// 远端地址；未连接时为 `None`。
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// 构造服务端通道"不支持"桩的统一错误。
pub fn unsupported_operation(op: &'static str) -> CoreError {
    CoreError::new(
        codes::CHANNEL_UNSUPPORTED_OPERATION,
        format!("server channel does not support `{op}`"),
    )
}
