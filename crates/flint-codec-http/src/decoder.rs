use std::mem;

use bytes::BytesMut;
use flint_core::{CoreError, codes};
use thiserror::Error;

use crate::message::{HeaderMap, HttpChunk, HttpObject, HttpResponse, HttpStatus, HttpVersion};

/// 编解码器共享的体积预算配置。
///
/// # 契约说明（What）
/// - `max_initial_line_length`：起始行（含分块长度行）的字节上限；
/// - `max_header_size`：单个头部块（含尾部头块）的累计字节上限；
/// - `max_chunk_size`：解码器单次向下游交付的主体分块上限，超长主体
///   会被切分为多个分块。
#[derive(Clone, Debug)]
pub struct HttpCodecConfig {
    pub max_initial_line_length: usize,
    pub max_header_size: usize,
    pub max_chunk_size: usize,
}

impl Default for HttpCodecConfig {
    fn default() -> Self {
        Self {
            max_initial_line_length: 4096,
            max_header_size: 8192,
            max_chunk_size: 8192,
        }
    }
}

impl HttpCodecConfig {
    /// 调整起始行预算。
    pub fn with_max_initial_line_length(mut self, limit: usize) -> Self {
        self.max_initial_line_length = limit;
        self
    }

    /// 调整头部块预算。
    pub fn with_max_header_size(mut self, limit: usize) -> Self {
        self.max_header_size = limit;
        self
    }

    /// 调整单分块交付上限。
    pub fn with_max_chunk_size(mut self, limit: usize) -> Self {
        self.max_chunk_size = limit;
        self
    }
}

/// HTTP 语法层错误，在处理器边界映射为稳定错误码。
#[derive(Debug, Error)]
pub enum HttpParseError {
    #[error("initial line exceeds {limit} bytes")]
    InitialLineTooLong { limit: usize },
    #[error("header block exceeds {limit} bytes")]
    HeaderBlockTooLarge { limit: usize },
    #[error("chunk size line exceeds {limit} bytes")]
    ChunkSizeLineTooLong { limit: usize },
    #[error("malformed status line: {0:?}")]
    InvalidStatusLine(String),
    #[error("unsupported protocol version: {0:?}")]
    InvalidVersion(String),
    #[error("malformed header line: {0:?}")]
    InvalidHeader(String),
    #[error("invalid content-length value: {0:?}")]
    InvalidContentLength(String),
    #[error("invalid chunk size: {0:?}")]
    InvalidChunkSize(String),
    #[error("missing CRLF after chunk data")]
    MissingChunkDelimiter,
}

impl HttpParseError {
    /// 映射到框架稳定错误码：预算类归于 `protocol.budget_exceeded`，
    /// 其余归于 `protocol.decode`。
    pub fn into_core(self) -> CoreError {
        let code = match &self {
            HttpParseError::InitialLineTooLong { .. }
            | HttpParseError::HeaderBlockTooLarge { .. }
            | HttpParseError::ChunkSizeLineTooLong { .. } => codes::PROTOCOL_BUDGET_EXCEEDED,
            _ => codes::PROTOCOL_DECODE,
        };
        CoreError::new(code, self.to_string())
    }
}

/// 响应体语义钩子：返回 `Some(true/false)` 为最终裁定，`None` 落回默认启发式。
pub type BodyPolicy = Box<dyn FnMut(&HttpResponse) -> Option<bool> + Send + 'static>;

/// 增量解码状态。
#[derive(Debug)]
enum DecodeState {
    /// 等待状态行。
    ReadInitial,
    /// 逐行累积响应头。
    ReadHeaders {
        response: HttpResponse,
        consumed: usize,
    },
    /// 累积定长小主体，随响应整体交付。
    ReadFixedBody {
        response: HttpResponse,
        remaining: usize,
    },
    /// 流式交付定长大主体。
    StreamFixedBody { remaining: usize },
    /// 等待分块长度行。
    ReadChunkSize,
    /// 交付分块数据。
    ReadChunkData { remaining: usize },
    /// 吞掉分块数据后的 CRLF。
    ReadChunkDelimiter,
    /// 逐行累积尾部头。
    ReadChunkTrailers {
        trailers: HeaderMap,
        consumed: usize,
    },
    /// 无长度信息：读到连接关闭为止。
    ReadUntilClose,
}

/// `ResponseDecoder` 是 HTTP/1.1 响应的增量解码状态机。
///
/// # 设计背景（Why）
/// - 输入按网络分片任意切割，状态机必须在任何字节边界可中断、可续接；
/// - 响应体的有无不能只看头部：HEAD/CONNECT 等方法语义由上层更清楚，
///   因此以 [`BodyPolicy`] 钩子把裁定权交给装配方，钩子缺席或弃权时
///   落回状态码启发式（1xx/204/304 无主体）。
///
/// # 契约说明（What）
/// - [`decode`](ResponseDecoder::decode) 消费 `src` 中尽可能多的字节，把
///   完整对象推入 `out`；输入不足时保留内部状态静待下一次调用；
/// - 交付形态：定长小主体（≤ `max_chunk_size`）合并为单个自洽响应；
///   其余主体以"响应头消息 + 分块流 + 终结块"交付；
/// - 钩子对每个响应的头部恰好被询问一次；
/// - [`finish`](ResponseDecoder::finish) 在连接终止时收束 read-until-close
///   主体，补发终结块。
///
/// # 风险提示（Trade-offs）
/// - 头部按 UTF-8 宽松解读（非法字节替换），与按字节透传的主体互不影响；
/// - 过时的头部折行（obs-fold）不被支持，遇到即判定语法错误。
pub struct ResponseDecoder {
    config: HttpCodecConfig,
    state: DecodeState,
    policy: Option<BodyPolicy>,
}

impl ResponseDecoder {
    /// 仅用默认启发式构造解码器。
    pub fn new(config: HttpCodecConfig) -> Self {
        Self {
            config,
            state: DecodeState::ReadInitial,
            policy: None,
        }
    }

    /// 附加响应体语义钩子。
    pub fn with_body_policy(config: HttpCodecConfig, policy: BodyPolicy) -> Self {
        Self {
            config,
            state: DecodeState::ReadInitial,
            policy: Some(policy),
        }
    }

    /// 消费输入并产出完整对象；输入不足时返回 `Ok` 并保留状态。
    pub fn decode(
        &mut self,
        src: &mut BytesMut,
        out: &mut Vec<HttpObject>,
    ) -> Result<(), HttpParseError> {
        self.decode_until(src, out, || false)
    }

    /// 与 [`decode`](ResponseDecoder::decode) 相同，但每当一条响应完整终结时
    /// 询问 `halt`；返回真则立即交还控制权，余下字节原样留在 `src` 中。
    ///
    /// # 契约说明（What）
    /// - 钩子可能在某条响应上改变通道语义（典型如 CONNECT 隧道达成），
    ///   此后剩余字节不再是 HTTP，调用方必须有机会在消息边界截停解码；
    /// - `halt` 只在消息边界被询问，不会打断半解析状态。
    pub fn decode_until(
        &mut self,
        src: &mut BytesMut,
        out: &mut Vec<HttpObject>,
        mut halt: impl FnMut() -> bool,
    ) -> Result<(), HttpParseError> {
        loop {
            match mem::replace(&mut self.state, DecodeState::ReadInitial) {
                DecodeState::ReadInitial => {
                    let limit = self.config.max_initial_line_length;
                    match take_line(src, limit, || HttpParseError::InitialLineTooLong { limit })? {
                        None => {
                            self.state = DecodeState::ReadInitial;
                            return Ok(());
                        }
                        // 容忍消息间多余的空行。
                        Some(line) if line.is_empty() => {
                            self.state = DecodeState::ReadInitial;
                        }
                        Some(line) => {
                            let response = parse_status_line(&line)?;
                            self.state = DecodeState::ReadHeaders {
                                response,
                                consumed: 0,
                            };
                        }
                    }
                }
                DecodeState::ReadHeaders {
                    mut response,
                    mut consumed,
                } => {
                    let limit = self.config.max_header_size;
                    let budget = limit.saturating_sub(consumed);
                    match take_line(src, budget, || HttpParseError::HeaderBlockTooLarge { limit })?
                    {
                        None => {
                            self.state = DecodeState::ReadHeaders { response, consumed };
                            return Ok(());
                        }
                        Some(line) if line.is_empty() => {
                            self.on_headers_complete(response, out)?;
                            if matches!(self.state, DecodeState::ReadInitial) && halt() {
                                return Ok(());
                            }
                        }
                        Some(line) => {
                            consumed += line.len() + 2;
                            let (name, value) = parse_header_line(&line)?;
                            response.headers.add(name, value);
                            self.state = DecodeState::ReadHeaders { response, consumed };
                        }
                    }
                }
                DecodeState::ReadFixedBody {
                    mut response,
                    remaining,
                } => {
                    if src.len() < remaining {
                        self.state = DecodeState::ReadFixedBody {
                            response,
                            remaining,
                        };
                        return Ok(());
                    }
                    response.set_content(src.split_to(remaining).freeze());
                    out.push(HttpObject::Response(response));
                    self.state = DecodeState::ReadInitial;
                    if halt() {
                        return Ok(());
                    }
                }
                DecodeState::StreamFixedBody { remaining } => {
                    if src.is_empty() {
                        self.state = DecodeState::StreamFixedBody { remaining };
                        return Ok(());
                    }
                    let take = src.len().min(remaining).min(self.config.max_chunk_size);
                    out.push(HttpObject::Chunk(HttpChunk::new(
                        src.split_to(take).freeze(),
                    )));
                    let remaining = remaining - take;
                    if remaining == 0 {
                        out.push(HttpObject::Chunk(HttpChunk::last()));
                        self.state = DecodeState::ReadInitial;
                        if halt() {
                            return Ok(());
                        }
                    } else {
                        self.state = DecodeState::StreamFixedBody { remaining };
                    }
                }
                DecodeState::ReadChunkSize => {
                    let limit = self.config.max_initial_line_length;
                    match take_line(src, limit, || HttpParseError::ChunkSizeLineTooLong { limit })?
                    {
                        None => {
                            self.state = DecodeState::ReadChunkSize;
                            return Ok(());
                        }
                        Some(line) => {
                            // 忽略分号之后的分块扩展。
                            let token = line.split(';').next().unwrap_or("").trim();
                            let size = usize::from_str_radix(token, 16)
                                .map_err(|_| HttpParseError::InvalidChunkSize(line.clone()))?;
                            if size == 0 {
                                self.state = DecodeState::ReadChunkTrailers {
                                    trailers: HeaderMap::new(),
                                    consumed: 0,
                                };
                            } else {
                                self.state = DecodeState::ReadChunkData { remaining: size };
                            }
                        }
                    }
                }
                DecodeState::ReadChunkData { remaining } => {
                    if src.is_empty() {
                        self.state = DecodeState::ReadChunkData { remaining };
                        return Ok(());
                    }
                    let take = src.len().min(remaining).min(self.config.max_chunk_size);
                    out.push(HttpObject::Chunk(HttpChunk::new(
                        src.split_to(take).freeze(),
                    )));
                    let remaining = remaining - take;
                    if remaining == 0 {
                        self.state = DecodeState::ReadChunkDelimiter;
                    } else {
                        self.state = DecodeState::ReadChunkData { remaining };
                    }
                }
                DecodeState::ReadChunkDelimiter => {
                    match take_line(src, 2, || HttpParseError::MissingChunkDelimiter)? {
                        None => {
                            self.state = DecodeState::ReadChunkDelimiter;
                            return Ok(());
                        }
                        Some(line) if line.is_empty() => {
                            self.state = DecodeState::ReadChunkSize;
                        }
                        Some(_) => return Err(HttpParseError::MissingChunkDelimiter),
                    }
                }
                DecodeState::ReadChunkTrailers {
                    mut trailers,
                    mut consumed,
                } => {
                    let limit = self.config.max_header_size;
                    let budget = limit.saturating_sub(consumed);
                    match take_line(src, budget, || HttpParseError::HeaderBlockTooLarge { limit })?
                    {
                        None => {
                            self.state = DecodeState::ReadChunkTrailers { trailers, consumed };
                            return Ok(());
                        }
                        Some(line) if line.is_empty() => {
                            let last = if trailers.is_empty() {
                                HttpChunk::last()
                            } else {
                                HttpChunk::last_with_trailers(trailers)
                            };
                            out.push(HttpObject::Chunk(last));
                            self.state = DecodeState::ReadInitial;
                            if halt() {
                                return Ok(());
                            }
                        }
                        Some(line) => {
                            consumed += line.len() + 2;
                            let (name, value) = parse_header_line(&line)?;
                            trailers.add(name, value);
                            self.state = DecodeState::ReadChunkTrailers { trailers, consumed };
                        }
                    }
                }
                DecodeState::ReadUntilClose => {
                    if src.is_empty() {
                        self.state = DecodeState::ReadUntilClose;
                        return Ok(());
                    }
                    let take = src.len().min(self.config.max_chunk_size);
                    out.push(HttpObject::Chunk(HttpChunk::new(
                        src.split_to(take).freeze(),
                    )));
                    self.state = DecodeState::ReadUntilClose;
                }
            }
        }
    }

    /// 连接终止回调：收束 read-until-close 主体。
    pub fn finish(&mut self, out: &mut Vec<HttpObject>) {
        if matches!(self.state, DecodeState::ReadUntilClose) {
            out.push(HttpObject::Chunk(HttpChunk::last()));
            self.state = DecodeState::ReadInitial;
        }
    }

    fn on_headers_complete(
        &mut self,
        mut response: HttpResponse,
        out: &mut Vec<HttpObject>,
    ) -> Result<(), HttpParseError> {
        let empty = self
            .policy
            .as_mut()
            .and_then(|policy| policy(&response))
            .unwrap_or_else(|| default_content_empty(&response));
        if empty {
            out.push(HttpObject::Response(response));
            self.state = DecodeState::ReadInitial;
            return Ok(());
        }
        if response.headers.is_transfer_chunked() {
            response.set_chunked(true);
            out.push(HttpObject::Response(response));
            self.state = DecodeState::ReadChunkSize;
            return Ok(());
        }
        match parse_content_length(&response.headers)? {
            Some(0) => {
                out.push(HttpObject::Response(response));
                self.state = DecodeState::ReadInitial;
            }
            Some(length) if length <= self.config.max_chunk_size => {
                self.state = DecodeState::ReadFixedBody {
                    response,
                    remaining: length,
                };
            }
            Some(length) => {
                response.set_chunked(true);
                out.push(HttpObject::Response(response));
                self.state = DecodeState::StreamFixedBody { remaining: length };
            }
            None => {
                response.set_chunked(true);
                out.push(HttpObject::Response(response));
                self.state = DecodeState::ReadUntilClose;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResponseDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseDecoder")
            .field("state", &self.state)
            .field("has_policy", &self.policy.is_some())
            .finish()
    }
}

/// 默认主体启发式：1xx、204、304 无主体。
fn default_content_empty(response: &HttpResponse) -> bool {
    let code = response.status().code();
    response.status().is_informational() || code == 204 || code == 304
}

/// 从缓冲切出一行：以 LF 终止、剥除行尾 CR；不完整时返回 `None`。
///
/// 行长（不含行终止符）超过 `limit`，或残缺行已超出 `limit`，
/// 均以 `overflow` 构造的错误失败。
fn take_line(
    src: &mut BytesMut,
    limit: usize,
    overflow: impl FnOnce() -> HttpParseError,
) -> Result<Option<String>, HttpParseError> {
    match src.iter().position(|byte| *byte == b'\n') {
        Some(pos) => {
            if pos > limit {
                return Err(overflow());
            }
            let line = src.split_to(pos + 1);
            let mut slice = &line[..pos];
            if let Some(stripped) = slice.strip_suffix(b"\r") {
                slice = stripped;
            }
            Ok(Some(String::from_utf8_lossy(slice).into_owned()))
        }
        None => {
            if src.len() > limit {
                return Err(overflow());
            }
            Ok(None)
        }
    }
}

fn parse_status_line(line: &str) -> Result<HttpResponse, HttpParseError> {
    let mut parts = line.splitn(3, ' ');
    let version_token = parts
        .next()
        .ok_or_else(|| HttpParseError::InvalidStatusLine(line.to_owned()))?;
    let version = HttpVersion::from_token(version_token)
        .ok_or_else(|| HttpParseError::InvalidVersion(version_token.to_owned()))?;
    let code_token = parts
        .next()
        .ok_or_else(|| HttpParseError::InvalidStatusLine(line.to_owned()))?;
    let code: u16 = code_token
        .parse()
        .map_err(|_| HttpParseError::InvalidStatusLine(line.to_owned()))?;
    let reason = parts.next().unwrap_or("").to_owned();
    Ok(HttpResponse::new(version, HttpStatus::new(code, reason)))
}

fn parse_header_line(line: &str) -> Result<(String, String), HttpParseError> {
    if line.starts_with(' ') || line.starts_with('\t') {
        // obs-fold 已被 RFC 9112 废止。
        return Err(HttpParseError::InvalidHeader(line.to_owned()));
    }
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| HttpParseError::InvalidHeader(line.to_owned()))?;
    if name.is_empty() || name.contains(' ') {
        return Err(HttpParseError::InvalidHeader(line.to_owned()));
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}

fn parse_content_length(headers: &HeaderMap) -> Result<Option<usize>, HttpParseError> {
    match headers.get("content-length") {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| HttpParseError::InvalidContentLength(value.to_owned())),
    }
}
