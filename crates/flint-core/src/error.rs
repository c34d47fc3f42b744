use std::borrow::Cow;
use std::fmt;

/// 框架统一的 `Result` 别名，错误位默认为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// `CoreError` 是运行时跨层共享的稳定错误载体。
///
/// # 设计背景（Why）
/// - 事件循环、通道与编解码器在不同层次产生的故障需要合流为统一的错误码，
///   以便日志与测试断言能够对语义做精确匹配，而不是解析自然语言消息。
/// - 错误码 `code` 恒为 `'static` 字符串并遵循 `<域>.<语义>` 命名约定；
///   `message` 面向排障人员，允许携带动态上下文。
///
/// # 契约说明（What）
/// - **前置条件**：调用方必须使用 [`codes`] 模块中的常量，或遵循同样约定的自定义码值；
/// - **返回值**：构造函数返回拥有所有权的 `CoreError`，可安全跨线程移动与克隆；
/// - **后置条件**：`code()` 与 `message()` 均为只读访问，不会修改内部状态。
///
/// # 风险提示（Trade-offs）
/// - 为了让完成令牌可以被多个观察者读取失败原因，错误实现 `Clone`，因此不携带
///   装箱的底层 `source` 链；需要根因时应在 `message` 中内联描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
}

impl CoreError {
    /// 构造核心错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取人类可读描述。
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for CoreError {}

/// 稳定错误码清单。
///
/// # 设计背景（Why）
/// - 将所有错误码集中登记，避免散落在调用点造成语义漂移；
/// - 测试与上层治理逻辑按码值分支，而非匹配消息文本。
///
/// # 契约说明（What）
/// - 码值一经发布即视为稳定 API，重命名属于破坏性变更；
/// - 新增码值时必须同步补充文档说明触发场景。
pub mod codes {
    /// 事件循环已进入关闭流程，拒绝新任务提交。
    pub const EXECUTOR_REJECTED: &str = "executor.rejected";

    /// 定时任务在到期前被调用方取消。
    pub const TASK_CANCELLED: &str = "task.cancelled";

    /// 服务端通道不支持的操作（connect/disconnect/flush）。
    pub const CHANNEL_UNSUPPORTED_OPERATION: &str = "channel.unsupported_operation";

    /// 通道重复注册到事件循环。
    pub const CHANNEL_ALREADY_REGISTERED: &str = "channel.already_registered";

    /// 操作要求通道先完成注册。
    pub const CHANNEL_NOT_REGISTERED: &str = "channel.not_registered";

    /// 通道已关闭，无法继续执行写入或连接类操作。
    pub const CHANNEL_CLOSED: &str = "channel.closed";

    /// 消息种类与处理器声明的缓冲种类不匹配。
    pub const PIPELINE_KIND_MISMATCH: &str = "pipeline.kind_mismatch";

    /// 入站字节流不符合协议语法。
    pub const PROTOCOL_DECODE: &str = "protocol.decode";

    /// 出站消息无法被编码器识别。
    pub const PROTOCOL_ENCODE: &str = "protocol.encode";

    /// 帧长度或头部体积超出配置预算。
    pub const PROTOCOL_BUDGET_EXCEEDED: &str = "protocol.budget_exceeded";

    /// 通道在仍有在途响应时变为非活跃。
    pub const PROTOCOL_PREMATURE_CLOSURE: &str = "protocol.premature_closure";
}
