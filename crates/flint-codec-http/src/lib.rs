#![doc = r#"
# flint-codec-http

## 设计动机（Why）
- **定位**：在 `flint-core` 的流水线契约之上提供 HTTP/1.1 客户端编解码：
  出站请求编码、入站响应的增量解码，以及把两者关联起来的方法队列。
- **关联语义**：响应体的有无不能只看响应头——HEAD 的响应永远无主体，
  CONNECT 的 200 使通道退化为裸隧道。编码器按出站顺序记录方法，
  解码器在每个响应头解析完成时出队对照，这正是客户端编解码器区别于
  纯语法解析器的全部增量。

## 核心契约（What）
- [`ResponseDecoder`]：任意字节边界可中断续接的响应状态机，内建起始行、
  头部块与单分块交付三项体积预算（默认 4096/8192/8192）；
- [`RequestEncoder`]：请求与分块的线格式序列化，分块请求以十六进制长度
  行包装；
- [`HttpClientCodec::pair`]：装配共享状态的处理器对；可选的
  fail-on-missing-response 模式在通道过早关闭时发射
  `protocol.premature_closure` 异常，写明缺失响应数。

## 风险与考量（Trade-offs）
- 隧道达成后编解码器不再理解字节内容，后续流量的语义由上层处理器负责；
- 头部按 UTF-8 宽松解读，主体按字节透传，两者互不影响。
"#]
#![deny(unsafe_code)]

mod client;
mod decoder;
mod encoder;
mod message;
mod method;

pub use client::{ClientHttpDecoder, ClientHttpEncoder, HttpClientCodec};
pub use decoder::{BodyPolicy, HttpCodecConfig, HttpParseError, ResponseDecoder};
pub use encoder::RequestEncoder;
pub use message::{
    HeaderMap, HttpChunk, HttpObject, HttpRequest, HttpResponse, HttpStatus, HttpVersion,
};
pub use method::HttpMethod;
