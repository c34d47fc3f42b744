use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::BytesMut;
use flint_core::{BufferKind, CoreError, Handler, HandlerContext, PipelineMessage, codes};

use crate::decoder::{BodyPolicy, HttpCodecConfig, HttpParseError, ResponseDecoder};
use crate::encoder::RequestEncoder;
use crate::message::{HttpChunk, HttpObject, HttpRequest};
use crate::method::HttpMethod;

/// 编码器与解码器共享的关联状态。
///
/// # 契约说明（What）
/// - `queue`：方法关联队列，出站请求入队、入站响应头出队，长度恒等于
///   "请求头已写出而响应头未解析"的在途数量；
/// - `done`：CONNECT 隧道达成后置位，此后解码器退化为原样透传、
///   编码器停止入队方法；
/// - `outstanding`：完整写出的请求数减去完整收到的响应数，仅在
///   fail-on-missing-response 模式下维护。
#[derive(Debug)]
struct CodecShared {
    queue: VecDeque<HttpMethod>,
    done: bool,
    outstanding: i64,
    fail_on_missing: bool,
}

/// `HttpClientCodec` 装配一对共享状态的客户端编解码处理器。
///
/// # 设计背景（Why）
/// - 请求与响应的对应关系只有把出站方法流与入站响应流放在一起才能判定：
///   HEAD 的响应必须按空主体解析、CONNECT 的 200 意味着通道从此是裸隧道；
/// - 两个处理器相邻安装在流水线头部区域：解码器在前（紧贴传输字节），
///   编码器在后，共享状态只在通道所属事件循环线程上被触碰。
///
/// # 使用方式（How）
/// ```ignore
/// let (encoder, decoder) = HttpClientCodec::pair(HttpCodecConfig::default(), false);
/// pipeline.add_last(decoder);
/// pipeline.add_last(encoder);
/// ```
pub struct HttpClientCodec;

impl HttpClientCodec {
    /// 构造共享状态的（编码器，解码器）处理器对。
    ///
    /// # 契约说明（What）
    /// - `fail_on_missing_response` 开启后维护在途计数：通道在计数大于零时
    ///   变为非活跃会沿入站链路发射 `protocol.premature_closure` 异常，
    ///   消息中写明缺失响应数。
    pub fn pair(
        config: HttpCodecConfig,
        fail_on_missing_response: bool,
    ) -> (ClientHttpEncoder, ClientHttpDecoder) {
        let shared = Arc::new(Mutex::new(CodecShared {
            queue: VecDeque::new(),
            done: false,
            outstanding: 0,
            fail_on_missing: fail_on_missing_response,
        }));

        let policy_shared = Arc::clone(&shared);
        let policy: BodyPolicy = Box::new(move |response| {
            let mut shared = policy_shared
                .lock()
                .expect("http client codec shared state lock poisoned");
            // 100 Continue 是同一请求的过渡应答，不消费关联队列。
            if response.status().code() == 100 {
                return Some(true);
            }
            match shared.queue.pop_front() {
                Some(method) if method == HttpMethod::HEAD => Some(true),
                Some(method)
                    if method == HttpMethod::CONNECT && response.status().code() == 200 =>
                {
                    // 隧道达成：此后字节不再具备 HTTP 语义。
                    shared.done = true;
                    shared.queue.clear();
                    Some(true)
                }
                _ => None,
            }
        });

        (
            ClientHttpEncoder {
                encoder: RequestEncoder::new(),
                shared: Arc::clone(&shared),
            },
            ClientHttpDecoder {
                decoder: ResponseDecoder::with_body_policy(config, policy),
                shared,
            },
        )
    }
}

/// 客户端出站处理器：请求/分块 → 线格式字节。
pub struct ClientHttpEncoder {
    encoder: RequestEncoder,
    shared: Arc<Mutex<CodecShared>>,
}

impl ClientHttpEncoder {
    fn lock_shared(&self) -> MutexGuard<'_, CodecShared> {
        self.shared
            .lock()
            .expect("http client codec shared state lock poisoned")
    }

    fn write_request(&mut self, request: &HttpRequest, wire: &mut BytesMut) {
        {
            let mut shared = self.lock_shared();
            if !shared.done {
                shared.queue.push_back(request.method().clone());
            }
        }
        self.encoder.encode_request(request, wire);
        let mut shared = self.lock_shared();
        if shared.fail_on_missing && !request.is_chunked() {
            shared.outstanding += 1;
        }
    }

    fn write_chunk(&mut self, chunk: &HttpChunk, wire: &mut BytesMut) {
        self.encoder.encode_chunk(chunk, wire);
        let mut shared = self.lock_shared();
        if shared.fail_on_missing && chunk.is_last() {
            shared.outstanding += 1;
        }
    }
}

impl Handler for ClientHttpEncoder {
    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("http-client-encoder")
    }

    fn inbound_kind(&self) -> BufferKind {
        BufferKind::Messages
    }

    fn outbound_kind(&self) -> BufferKind {
        BufferKind::Messages
    }

    fn on_outbound(&mut self, ctx: &mut HandlerContext<'_>) -> flint_core::Result<(), CoreError> {
        let mut wire = BytesMut::new();
        while let Some(message) = ctx.outbound().pop_message() {
            let message = match message.downcast_user::<HttpRequest>() {
                Ok(request) => {
                    self.write_request(&request, &mut wire);
                    continue;
                }
                Err(message) => message,
            };
            let message = match message.downcast_user::<HttpChunk>() {
                Ok(chunk) => {
                    self.write_chunk(&chunk, &mut wire);
                    continue;
                }
                Err(message) => message,
            };
            match message {
                // 隧道写入：原样下行。
                PipelineMessage::Buffer(bytes) => wire.extend_from_slice(&bytes),
                PipelineMessage::User(_) => {
                    return Err(CoreError::new(
                        codes::PROTOCOL_ENCODE,
                        "http client encoder accepts requests, chunks or raw buffers only",
                    ));
                }
            }
        }
        if !wire.is_empty() {
            ctx.write_outbound_next(PipelineMessage::Buffer(wire.freeze()))?;
            ctx.fire_outbound_next()?;
        }
        Ok(())
    }
}

/// 客户端入站处理器：线格式字节 → 响应对象（或隧道原样字节）。
pub struct ClientHttpDecoder {
    decoder: ResponseDecoder,
    shared: Arc<Mutex<CodecShared>>,
}

impl ClientHttpDecoder {
    fn lock_shared(&self) -> MutexGuard<'_, CodecShared> {
        self.shared
            .lock()
            .expect("http client codec shared state lock poisoned")
    }

    fn is_done(&self) -> bool {
        self.lock_shared().done
    }

    /// 终结消息驱动在途计数：非分块且非过渡性的响应、以及终结块各记一次。
    fn note_terminal(&self, object: &HttpObject) {
        let mut shared = self.lock_shared();
        if !shared.fail_on_missing {
            return;
        }
        match object {
            HttpObject::Response(response)
                if !response.is_chunked() && !response.status().is_informational() =>
            {
                shared.outstanding -= 1;
            }
            HttpObject::Chunk(chunk) if chunk.is_last() => {
                shared.outstanding -= 1;
            }
            _ => {}
        }
    }
}

fn wrap_object(object: HttpObject) -> PipelineMessage {
    match object {
        HttpObject::Response(response) => PipelineMessage::user(response),
        HttpObject::Chunk(chunk) => PipelineMessage::user(chunk),
    }
}

impl Handler for ClientHttpDecoder {
    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("http-client-decoder")
    }

    fn inbound_kind(&self) -> BufferKind {
        BufferKind::Bytes
    }

    fn outbound_kind(&self) -> BufferKind {
        BufferKind::Bytes
    }

    fn on_inbound(&mut self, ctx: &mut HandlerContext<'_>) -> flint_core::Result<(), CoreError> {
        let mut produced = false;
        if !self.is_done() {
            let mut objects = Vec::new();
            {
                let src = ctx.inbound().bytes_mut().ok_or_else(|| {
                    CoreError::new(
                        codes::PIPELINE_KIND_MISMATCH,
                        "http client decoder requires a byte inbound holder",
                    )
                })?;
                // CONNECT 隧道可能在本批输入内达成，解码必须在消息边界截停，
                // 以免把隧道负载误解析成下一条响应。
                let halt_shared = Arc::clone(&self.shared);
                self.decoder
                    .decode_until(src, &mut objects, move || {
                        halt_shared
                            .lock()
                            .expect("http client codec shared state lock poisoned")
                            .done
                    })
                    .map_err(HttpParseError::into_core)?;
            }
            for object in objects {
                self.note_terminal(&object);
                ctx.write_inbound_next(wrap_object(object))?;
                produced = true;
            }
        }
        // 隧道模式（含本批输入内刚刚达成的 CONNECT）：剩余字节原样上行。
        if self.is_done()
            && let Some(bytes) = ctx.inbound().take_bytes()
        {
            ctx.write_inbound_next(PipelineMessage::Buffer(bytes))?;
            produced = true;
        }
        if produced {
            ctx.fire_inbound_next()?;
        }
        Ok(())
    }

    fn on_channel_inactive(&mut self, ctx: &mut HandlerContext<'_>) {
        // 收束 read-until-close 主体后，检查在途响应缺口。
        let mut objects = Vec::new();
        self.decoder.finish(&mut objects);
        let mut produced = false;
        for object in objects {
            self.note_terminal(&object);
            match ctx.write_inbound_next(wrap_object(object)) {
                Ok(()) => produced = true,
                Err(error) => tracing::warn!(
                    code = error.code(),
                    "dropping trailing body object on inactive channel"
                ),
            }
        }
        if produced {
            let _ = ctx.fire_inbound_next();
        }

        let missing = {
            let shared = self.lock_shared();
            (shared.fail_on_missing && shared.outstanding > 0).then_some(shared.outstanding)
        };
        if let Some(count) = missing {
            ctx.fire_exception_next(CoreError::new(
                codes::PROTOCOL_PREMATURE_CLOSURE,
                format!("channel closed with {count} missing response(s)"),
            ));
        }
        ctx.fire_channel_inactive_next();
    }
}
