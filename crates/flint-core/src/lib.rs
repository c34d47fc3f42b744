#![doc = r#"
# flint-core

## 设计动机（Why）
- **定位**：本 crate 提供一个非阻塞通道/流水线运行时的核心：单线程事件循环
  调度器、绑定单一循环的通道抽象、以及承载编解码器的处理器链路与上下文缓冲。
- **架构角色**：作为传输实现与协议编解码器（如 `flint-codec-http`）共同依赖的
  底座，对外只暴露执行纪律与缓冲契约，不触碰任何具体套接字细节。
- **设计理念**：以"单线程触碰"换取零锁的每通道状态——所有通道状态、流水线
  与编解码器状态都只在所属事件循环线程上被访问，跨线程通信统一经由
  [`EventLoop::execute`]。

## 核心契约（What）
- **事件循环**：任务提交线程安全且保序；定时任务支持一次性、固定速率与
  固定间隔三种形态；关闭后拒绝新提交但排空存量任务，清理钩子恰好执行一次；
- **通道**：生命周期操作（注册、连接、断开、冲刷、关闭、写入）均以
  [`CompletionToken`] 异步收敛，并保证在循环线程上完成；服务端通道以
  "不支持"桩与丢弃型出站缓冲表达操作限制；
- **流水线**：入站字节自头向尾上行、出站消息自尾向头下行；生命周期事件
  沿入站链路各广播一次，未被处置的异常在尾部记录日志。

## 风险与考量（Trade-offs）
- 工作线程的唤醒采用条件变量而非自管道，依赖"工作线程只在带超时的等待中
  停驻"这一内部不变式；
- 处理器回调内不得同步调用通道公共操作，需要级联时应经由事件循环延后。
"#]
#![deny(unsafe_code)]

pub mod buffer;
pub mod channel;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod tally;
pub mod test_stubs;
pub mod time;
pub mod token;
pub mod transport;

pub use buffer::{BufferHolder, BufferKind, PipelineMessage};
pub use channel::Channel;
pub use error::{CoreError, Result, codes};
pub use executor::{EventLoop, EventLoopBuilder, ScheduledHandle};
pub use pipeline::{Handler, HandlerContext, Pipeline, UserEvent};
pub use tally::InstanceTally;
pub use time::{Clock, SystemClock};
pub use token::{CompletionState, CompletionToken};
pub use transport::Transport;
