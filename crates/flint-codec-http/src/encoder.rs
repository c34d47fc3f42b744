use bytes::BytesMut;

use crate::message::{HttpChunk, HttpRequest};

/// `RequestEncoder` 将请求与主体分块序列化为线格式字节。
///
/// # 设计背景（Why）
/// - 分块的线格式取决于所属请求是否声明了分块传输：同一个 [`HttpChunk`]
///   在分块请求下需要十六进制长度行包装，在流式写入下则原样落盘；
///   编码器因此记录在途请求的分块形态。
///
/// # 契约说明（What）
/// - `encode_request` 写出请求行、头部与内联主体，并记录请求的分块形态；
/// - `encode_chunk` 依据在途形态包装分块；终结块写出 `0\r\n`、可选尾部头
///   与空行，并清除在途形态；
/// - 头部按调用方存入顺序原样写出，不补写 `Content-Length` 等派生头。
///
/// # 风险提示（Trade-offs）
/// - 无在途请求时收到分块按原样字节写出，以兼容隧道与手工流式场景；
///   协议正确性由调用方保证。
#[derive(Debug, Default)]
pub struct RequestEncoder {
    current_chunked: Option<bool>,
}

impl RequestEncoder {
    /// 创建编码器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 编码一条请求。
    pub fn encode_request(&mut self, request: &HttpRequest, dst: &mut BytesMut) {
        dst.extend_from_slice(request.method().name().as_bytes());
        dst.extend_from_slice(b" ");
        dst.extend_from_slice(request.uri().as_bytes());
        dst.extend_from_slice(b" ");
        dst.extend_from_slice(request.version().as_str().as_bytes());
        dst.extend_from_slice(b"\r\n");
        for (name, value) in request.headers.iter() {
            dst.extend_from_slice(name.as_bytes());
            dst.extend_from_slice(b": ");
            dst.extend_from_slice(value.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
        dst.extend_from_slice(b"\r\n");
        if !request.is_chunked() {
            dst.extend_from_slice(request.content());
        }
        self.current_chunked = Some(request.is_chunked());
    }

    /// 编码一个主体分块。
    pub fn encode_chunk(&mut self, chunk: &HttpChunk, dst: &mut BytesMut) {
        let chunked = self.current_chunked.unwrap_or(false);
        if !chunked {
            dst.extend_from_slice(chunk.data());
            if chunk.is_last() {
                self.current_chunked = None;
            }
            return;
        }
        if chunk.is_last() {
            dst.extend_from_slice(b"0\r\n");
            if let Some(trailers) = chunk.trailers() {
                for (name, value) in trailers.iter() {
                    dst.extend_from_slice(name.as_bytes());
                    dst.extend_from_slice(b": ");
                    dst.extend_from_slice(value.as_bytes());
                    dst.extend_from_slice(b"\r\n");
                }
            }
            dst.extend_from_slice(b"\r\n");
            self.current_chunked = None;
        } else {
            dst.extend_from_slice(format!("{:x}\r\n", chunk.data().len()).as_bytes());
            dst.extend_from_slice(chunk.data());
            dst.extend_from_slice(b"\r\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HeaderMap;
    use crate::method::HttpMethod;
    use bytes::Bytes;

    #[test]
    fn request_line_headers_and_body_are_written_in_order() {
        let mut encoder = RequestEncoder::new();
        let mut wire = BytesMut::new();
        let request = HttpRequest::new(HttpMethod::POST, "/echo")
            .with_header("Host", "example.com")
            .with_header("Content-Length", "4")
            .with_content(Bytes::from_static(b"ping"));
        encoder.encode_request(&request, &mut wire);
        assert_eq!(
            wire.as_ref(),
            b"POST /echo HTTP/1.1\r\nHost: example.com\r\nContent-Length: 4\r\n\r\nping" as &[u8]
        );
    }

    #[test]
    fn chunked_request_frames_chunks_with_hex_sizes() {
        // Why: 分块请求的每个数据块都要带十六进制长度行，终结块写 0 行加空行。
        let mut encoder = RequestEncoder::new();
        let mut wire = BytesMut::new();
        let request = HttpRequest::new(HttpMethod::POST, "/stream")
            .with_header("Transfer-Encoding", "chunked")
            .chunked();
        encoder.encode_request(&request, &mut wire);
        encoder.encode_chunk(&HttpChunk::new(Bytes::from_static(b"hello, ")), &mut wire);
        encoder.encode_chunk(&HttpChunk::new(Bytes::from_static(b"world")), &mut wire);
        encoder.encode_chunk(&HttpChunk::last(), &mut wire);
        let text = String::from_utf8(wire.to_vec()).expect("ascii wire");
        assert!(text.ends_with("7\r\nhello, \r\n5\r\nworld\r\n0\r\n\r\n"));
    }

    #[test]
    fn last_chunk_may_carry_trailers() {
        let mut encoder = RequestEncoder::new();
        let mut wire = BytesMut::new();
        let request = HttpRequest::new(HttpMethod::POST, "/stream")
            .with_header("Transfer-Encoding", "chunked")
            .chunked();
        encoder.encode_request(&request, &mut wire);
        let mut trailers = HeaderMap::new();
        trailers.add("X-Checksum", "abc123");
        encoder.encode_chunk(&HttpChunk::last_with_trailers(trailers), &mut wire);
        let text = String::from_utf8(wire.to_vec()).expect("ascii wire");
        assert!(text.ends_with("0\r\nX-Checksum: abc123\r\n\r\n"));
    }

    #[test]
    fn chunks_without_chunked_request_pass_through_verbatim() {
        let mut encoder = RequestEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode_chunk(&HttpChunk::new(Bytes::from_static(b"raw")), &mut wire);
        assert_eq!(wire.as_ref(), b"raw");
    }
}
