use std::fmt;

use bytes::Bytes;

use crate::method::HttpMethod;

/// 支持的 HTTP 协议版本。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP/1.0。
    Http10,
    /// HTTP/1.1。
    Http11,
}

impl HttpVersion {
    /// 版本在报文中的文本形态。
    pub fn as_str(self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }

    /// 从报文令牌识别版本；未知版本返回 `None`。
    pub fn from_token(token: &str) -> Option<HttpVersion> {
        match token {
            "HTTP/1.0" => Some(HttpVersion::Http10),
            "HTTP/1.1" => Some(HttpVersion::Http11),
            _ => None,
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 响应状态：数字码与原因短语。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpStatus {
    code: u16,
    reason: String,
}

impl HttpStatus {
    /// 构造状态。
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// 数字状态码。
    pub fn code(&self) -> u16 {
        self.code
    }

    /// 原因短语。
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// 是否为 1xx 过渡性响应。
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }
}

/// 保序、按名大小写不敏感检索的头部集合。
///
/// # 契约说明（What）
/// - `add` 追加条目并保留报文中的出现顺序；
/// - `get` 返回首个同名条目的值，名字比较忽略 ASCII 大小写；
/// - 编码侧按存入顺序原样写出，不做任何规范化。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// 创建空集合。
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个头部条目。
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// 取首个同名条目的值。
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// 是否存在同名条目。
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 按出现顺序迭代全部条目。
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// 条目数量。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `Transfer-Encoding` 是否声明了 chunked。
    pub fn is_transfer_chunked(&self) -> bool {
        self.get("transfer-encoding")
            .is_some_and(|value| {
                value
                    .split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
            })
    }
}

/// 出站 HTTP 请求。
///
/// # 契约说明（What）
/// - `chunked` 标记该请求的主体以分块方式另行发送（[`HttpChunk`] 流），
///   此时 `content` 必须为空；
/// - 头部由调用方负责补全（包括 `Content-Length`/`Transfer-Encoding`），
///   编码器按存入顺序原样写出。
#[derive(Debug)]
pub struct HttpRequest {
    method: HttpMethod,
    uri: String,
    version: HttpVersion,
    /// 请求头集合，调用方可直接增改。
    pub headers: HeaderMap,
    content: Bytes,
    chunked: bool,
}

impl HttpRequest {
    /// 以 HTTP/1.1 构造请求。
    pub fn new(method: HttpMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            version: HttpVersion::Http11,
            headers: HeaderMap::new(),
            content: Bytes::new(),
            chunked: false,
        }
    }

    /// 链式追加头部。
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// 附带完整主体（非分块）。
    pub fn with_content(mut self, content: Bytes) -> Self {
        self.content = content;
        self.chunked = false;
        self
    }

    /// 声明主体以分块流方式发送。
    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self.content = Bytes::new();
        self
    }

    /// 请求方法。
    pub fn method(&self) -> &HttpMethod {
        &self.method
    }

    /// 请求目标。
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// 协议版本。
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// 内联主体。
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// 主体是否以分块流另行发送。
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }
}

/// 入站 HTTP 响应。
///
/// # 契约说明（What）
/// - `is_chunked()` 为假时本消息自洽：`content` 即完整主体，响应到此终结；
/// - 为真时主体以后续 [`HttpChunk`] 流送达，直至 `is_last()` 的终结块。
#[derive(Debug)]
pub struct HttpResponse {
    version: HttpVersion,
    status: HttpStatus,
    /// 响应头集合。
    pub headers: HeaderMap,
    content: Bytes,
    chunked: bool,
}

impl HttpResponse {
    /// 构造空主体响应。
    pub fn new(version: HttpVersion, status: HttpStatus) -> Self {
        Self {
            version,
            status,
            headers: HeaderMap::new(),
            content: Bytes::new(),
            chunked: false,
        }
    }

    /// 协议版本。
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// 响应状态。
    pub fn status(&self) -> &HttpStatus {
        &self.status
    }

    /// 内联主体。
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// 主体是否以分块流跟随。
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub(crate) fn set_content(&mut self, content: Bytes) {
        self.content = content;
    }

    pub(crate) fn set_chunked(&mut self, chunked: bool) {
        self.chunked = chunked;
    }
}

/// 主体分块；空数据块为流终结标记。
#[derive(Debug)]
pub struct HttpChunk {
    data: Bytes,
    trailers: Option<HeaderMap>,
}

impl HttpChunk {
    /// 构造携带数据的分块。
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            trailers: None,
        }
    }

    /// 构造不带尾部头的终结块。
    pub fn last() -> Self {
        Self::new(Bytes::new())
    }

    /// 构造携带尾部头的终结块。
    pub fn last_with_trailers(trailers: HeaderMap) -> Self {
        Self {
            data: Bytes::new(),
            trailers: Some(trailers),
        }
    }

    /// 分块数据。
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// 尾部头（仅终结块可能携带）。
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    /// 是否为流终结标记。
    pub fn is_last(&self) -> bool {
        self.data.is_empty()
    }
}

/// 响应解码器的输出对象。
#[derive(Debug)]
pub enum HttpObject {
    /// 响应头消息（可能自带完整主体）。
    Response(HttpResponse),
    /// 主体分块。
    Chunk(HttpChunk),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_ascii_case() {
        let mut headers = HeaderMap::new();
        headers.add("Content-Length", "12");
        assert_eq!(headers.get("content-length"), Some("12"));
        assert!(headers.contains("CONTENT-LENGTH"));
    }

    #[test]
    fn transfer_chunked_matches_token_list() {
        let mut headers = HeaderMap::new();
        headers.add("Transfer-Encoding", "gzip, Chunked");
        assert!(headers.is_transfer_chunked());
        let mut identity = HeaderMap::new();
        identity.add("Transfer-Encoding", "identity");
        assert!(!identity.is_transfer_chunked());
    }

    #[test]
    fn chunked_request_drops_inline_content() {
        let request = HttpRequest::new(HttpMethod::POST, "/upload")
            .with_content(Bytes::from_static(b"ignored"))
            .chunked();
        assert!(request.is_chunked());
        assert!(request.content().is_empty());
    }

    #[test]
    fn empty_chunk_is_last() {
        assert!(HttpChunk::last().is_last());
        assert!(!HttpChunk::new(Bytes::from_static(b"x")).is_last());
    }
}
