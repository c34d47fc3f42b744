use std::any::Any;
use std::collections::VecDeque;
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::{CoreError, codes};

/// `PipelineMessage` 统一承载网络层字节与业务层对象。
///
/// # 设计背景（Why）
/// - 流水线在编解码前后传递的内容跨越两个抽象层次：传输侧的原始字节与
///   应用侧的协议对象；单一消息类型让处理器上下文的缓冲 API 保持统一。
/// - `User` 变体通过 `Any` 做运行时下转型，使流水线无需为每种协议泛型化。
///
/// # 契约说明（What）
/// - **前置条件**：`User` 内部类型必须满足 `Send`，以便随通道操作跨线程搬运；
/// - **后置条件**：消费 `User` 前必须显式判定类型，转换失败时应走异常事件分支。
///
/// # 风险提示（Trade-offs）
/// - 类型擦除牺牲了编译期检查，换取动态装配流水线的能力；
/// - `Debug` 输出刻意隐藏负载内容，避免日志泄漏敏感字节。
pub enum PipelineMessage {
    /// 传输层字节缓冲。
    Buffer(Bytes),
    /// 应用层业务消息。
    User(Box<dyn Any + Send>),
}

impl PipelineMessage {
    /// 将业务对象包装为 `User` 消息。
    pub fn user<T: Any + Send>(value: T) -> Self {
        PipelineMessage::User(Box::new(value))
    }

    /// 是否为字节缓冲变体。
    pub fn is_buffer(&self) -> bool {
        matches!(self, PipelineMessage::Buffer(_))
    }

    /// 以只读方式访问字节缓冲。
    pub fn as_buffer(&self) -> Option<&Bytes> {
        match self {
            PipelineMessage::Buffer(bytes) => Some(bytes),
            PipelineMessage::User(_) => None,
        }
    }

    /// 以只读方式访问指定类型的业务消息。
    pub fn user_ref<T: Any>(&self) -> Option<&T> {
        match self {
            PipelineMessage::User(value) => value.downcast_ref::<T>(),
            PipelineMessage::Buffer(_) => None,
        }
    }

    /// 尝试取出指定类型的业务消息；类型不符时原样归还消息。
    pub fn downcast_user<T: Any>(self) -> Result<T, PipelineMessage> {
        match self {
            PipelineMessage::User(value) => match value.downcast::<T>() {
                Ok(boxed) => Ok(*boxed),
                Err(other) => Err(PipelineMessage::User(other)),
            },
            other => Err(other),
        }
    }
}

impl fmt::Debug for PipelineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMessage::Buffer(bytes) => {
                f.debug_tuple("Buffer").field(&bytes.len()).finish()
            }
            PipelineMessage::User(_) => f.debug_tuple("User").field(&"<erased-user>").finish(),
        }
    }
}

/// 处理器对某一方向声明的缓冲种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// 连续字节流。
    Bytes,
    /// 有序对象消息队列。
    Messages,
}

/// `BufferHolder` 是处理器上下文与通道共用的缓冲占位变体。
///
/// # 设计背景（Why）
/// - 入站字节、解码后的消息序列与服务端通道的"只进不出"占位需要同一个
///   容器抽象，流水线才能按统一 API 搬运内容而无需特判节点身份。
///
/// # 逻辑解析（How）
/// - `Bytes` 以 `BytesMut` 承载可增长字节队列；
/// - `Messages` 以 `VecDeque` 保序存放 [`PipelineMessage`]；
/// - `Discard` 接受一切写入并立即丢弃，使服务端通道的出站占位对 API 完全透明。
///
/// # 契约说明（What）
/// - 写入内容必须与持有者声明的 [`BufferKind`] 兼容：向字节缓冲推入 `User`
///   消息返回 `pipeline.kind_mismatch`；`Discard` 无条件接受。
#[derive(Debug)]
pub enum BufferHolder {
    /// 可增长字节队列。
    Bytes(BytesMut),
    /// 有序消息队列。
    Messages(VecDeque<PipelineMessage>),
    /// 接受并丢弃的哨兵。
    Discard,
}

impl BufferHolder {
    /// 依据声明的缓冲种类分配空容器。
    pub fn for_kind(kind: BufferKind) -> Self {
        match kind {
            BufferKind::Bytes => BufferHolder::Bytes(BytesMut::new()),
            BufferKind::Messages => BufferHolder::Messages(VecDeque::new()),
        }
    }

    /// 丢弃哨兵。
    pub fn discard() -> Self {
        BufferHolder::Discard
    }

    /// 推入一条消息；种类不兼容时返回 `pipeline.kind_mismatch`。
    pub fn push(&mut self, message: PipelineMessage) -> crate::Result<(), CoreError> {
        match self {
            BufferHolder::Bytes(buf) => match message {
                PipelineMessage::Buffer(bytes) => {
                    buf.extend_from_slice(&bytes);
                    Ok(())
                }
                PipelineMessage::User(_) => Err(CoreError::new(
                    codes::PIPELINE_KIND_MISMATCH,
                    "user message offered to a byte buffer holder",
                )),
            },
            BufferHolder::Messages(queue) => {
                queue.push_back(message);
                Ok(())
            }
            BufferHolder::Discard => Ok(()),
        }
    }

    /// 追加原始字节；仅字节缓冲与丢弃哨兵接受。
    pub fn extend_bytes(&mut self, bytes: &[u8]) -> crate::Result<(), CoreError> {
        match self {
            BufferHolder::Bytes(buf) => {
                buf.extend_from_slice(bytes);
                Ok(())
            }
            BufferHolder::Discard => Ok(()),
            BufferHolder::Messages(_) => Err(CoreError::new(
                codes::PIPELINE_KIND_MISMATCH,
                "raw bytes offered to a message queue holder",
            )),
        }
    }

    /// 弹出队首消息；字节缓冲与丢弃哨兵返回 `None`。
    pub fn pop_message(&mut self) -> Option<PipelineMessage> {
        match self {
            BufferHolder::Messages(queue) => queue.pop_front(),
            _ => None,
        }
    }

    /// 取走当前可读的全部字节；空缓冲或非字节变体返回 `None`。
    pub fn take_bytes(&mut self) -> Option<Bytes> {
        match self {
            BufferHolder::Bytes(buf) if !buf.is_empty() => Some(buf.split().freeze()),
            _ => None,
        }
    }

    /// 以可变方式访问底层字节缓冲，供解码器原地消费。
    pub fn bytes_mut(&mut self) -> Option<&mut BytesMut> {
        match self {
            BufferHolder::Bytes(buf) => Some(buf),
            _ => None,
        }
    }

    /// 可读内容量：字节数或消息条数，丢弃哨兵恒为零。
    pub fn len(&self) -> usize {
        match self {
            BufferHolder::Bytes(buf) => buf.len(),
            BufferHolder::Messages(queue) => queue.len(),
            BufferHolder::Discard => 0,
        }
    }

    /// 是否没有可读内容。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 将本缓冲的全部内容搬运到 `target`。
    ///
    /// # 契约说明（What）
    /// - 字节→字节追加、消息→消息保序追加；
    /// - 消息→字节要求每条消息都是 `Buffer` 变体，遇到 `User` 立即失败且不回滚已搬部分；
    /// - 字节→消息将全部字节包装为单条 `Buffer` 消息；
    /// - 目标为 `Discard` 时内容被清空丢弃。
    pub fn drain_into(&mut self, target: &mut BufferHolder) -> crate::Result<(), CoreError> {
        match self {
            BufferHolder::Bytes(buf) => {
                if buf.is_empty() {
                    return Ok(());
                }
                let bytes = buf.split().freeze();
                target.push(PipelineMessage::Buffer(bytes))
            }
            BufferHolder::Messages(queue) => {
                while let Some(message) = queue.pop_front() {
                    target.push(message)?;
                }
                Ok(())
            }
            BufferHolder::Discard => Ok(()),
        }
    }
}
