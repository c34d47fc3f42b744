//! 客户端编解码器的端到端行为测试：方法关联、HEAD/CONNECT 语义、
//! 隧道透传与过早关闭检测。

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use flint_core::test_stubs::RecordingHandler;
use flint_core::{BufferKind, Pipeline, PipelineMessage};
use flint_codec_http::{
    HttpChunk, HttpClientCodec, HttpCodecConfig, HttpMethod, HttpRequest, HttpResponse,
};

/// 装配 [解码器, 编码器, 观察者] 的标准客户端流水线。
fn codec_pipeline(fail_on_missing: bool) -> (Pipeline, Arc<Mutex<Vec<String>>>) {
    let (encoder, decoder) = HttpClientCodec::pair(HttpCodecConfig::default(), fail_on_missing);
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new(1);
    pipeline
        .add_last(decoder)
        .add_last(encoder)
        .add_last(RecordingHandler::sharing(
            "app",
            BufferKind::Messages,
            BufferKind::Messages,
            Arc::clone(&log),
        ));
    (pipeline, log)
}

fn write_request(pipeline: &mut Pipeline, request: HttpRequest) {
    pipeline
        .write_outbound(PipelineMessage::user(request))
        .expect("write request");
}

fn sink_bytes(pipeline: &mut Pipeline) -> Vec<u8> {
    pipeline
        .outbound_sink_mut()
        .take_bytes()
        .map(|bytes| bytes.to_vec())
        .unwrap_or_default()
}

#[test]
fn get_exchange_correlates_request_and_response() {
    let (mut pipeline, _log) = codec_pipeline(false);
    write_request(
        &mut pipeline,
        HttpRequest::new(HttpMethod::GET, "/index").with_header("Host", "example.com"),
    );
    let wire = sink_bytes(&mut pipeline);
    assert!(wire.starts_with(b"GET /index HTTP/1.1\r\n"));

    pipeline
        .feed_inbound(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
        .expect("feed");
    let mut received = pipeline.drain_received();
    assert_eq!(received.len(), 1);
    let response = received
        .remove(0)
        .downcast_user::<HttpResponse>()
        .expect("decoded response");
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.content().as_ref(), b"ok");
}

#[test]
fn head_response_is_empty_regardless_of_headers() {
    // Why: HEAD 的响应头可以宣称任意 Content-Length，但主体永远不存在；
    //      若解码器误等主体，后续响应将整体错位。
    let (mut pipeline, _log) = codec_pipeline(false);
    write_request(&mut pipeline, HttpRequest::new(HttpMethod::HEAD, "/meta"));
    write_request(&mut pipeline, HttpRequest::new(HttpMethod::GET, "/data"));
    sink_bytes(&mut pipeline);

    pipeline
        .feed_inbound(
            b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi",
        )
        .expect("feed");
    let mut received = pipeline.drain_received();
    assert_eq!(received.len(), 2);
    let head_response = received
        .remove(0)
        .downcast_user::<HttpResponse>()
        .expect("head response");
    assert!(head_response.content().is_empty());
    let get_response = received
        .remove(0)
        .downcast_user::<HttpResponse>()
        .expect("get response");
    assert_eq!(get_response.content().as_ref(), b"hi");
}

#[test]
fn connect_200_switches_channel_into_tunnel_mode() {
    // CONNECT 达成后：入站字节以原样缓冲上行，出站缓冲照原样下行，
    // 即便内容长得像 HTTP 也不再被解析。
    let (mut pipeline, _log) = codec_pipeline(false);
    write_request(
        &mut pipeline,
        HttpRequest::new(HttpMethod::CONNECT, "example.com:443"),
    );
    sink_bytes(&mut pipeline);

    pipeline
        .feed_inbound(b"HTTP/1.1 200 Connection Established\r\n\r\nraw-tunnel-payload")
        .expect("feed");
    let mut received = pipeline.drain_received();
    assert_eq!(received.len(), 2);
    let established = received
        .remove(0)
        .downcast_user::<HttpResponse>()
        .expect("connect response");
    assert_eq!(established.status().code(), 200);
    let passthrough = received.remove(0);
    assert_eq!(
        passthrough.as_buffer().expect("opaque bytes").as_ref(),
        b"raw-tunnel-payload"
    );

    // 后续"看似 HTTP"的字节同样原样上行。
    pipeline
        .feed_inbound(b"HTTP/1.1 404 Not Found\r\n\r\n")
        .expect("feed");
    let received = pipeline.drain_received();
    assert_eq!(received.len(), 1);
    assert!(received[0].is_buffer());

    // 隧道写入原样落入出站缓冲。
    pipeline
        .write_outbound(PipelineMessage::Buffer(Bytes::from_static(b"tls-hello")))
        .expect("tunnel write");
    assert_eq!(sink_bytes(&mut pipeline), b"tls-hello");
}

#[test]
fn chunked_response_streams_through_the_codec() {
    let (mut pipeline, _log) = codec_pipeline(false);
    write_request(&mut pipeline, HttpRequest::new(HttpMethod::GET, "/stream"));
    sink_bytes(&mut pipeline);

    // 分片注入，覆盖状态机续接。
    for piece in [
        &b"HTTP/1.1 200 OK\r\nTransfer-Enco"[..],
        &b"ding: chunked\r\n\r\n5\r\nhel"[..],
        &b"lo\r\n0\r\n\r\n"[..],
    ] {
        pipeline.feed_inbound(piece).expect("feed");
    }
    let mut received = pipeline.drain_received();
    assert!(received.len() >= 3);
    let response = received
        .remove(0)
        .downcast_user::<HttpResponse>()
        .expect("response");
    assert!(response.is_chunked());
    let mut body = Vec::new();
    let mut saw_last = false;
    for message in received {
        let chunk = message.downcast_user::<HttpChunk>().expect("chunk");
        if chunk.is_last() {
            saw_last = true;
        } else {
            body.extend_from_slice(chunk.data());
        }
    }
    assert!(saw_last);
    assert_eq!(body, b"hello");
}

#[test]
fn balanced_exchanges_leave_no_outstanding_responses() {
    let (mut pipeline, log) = codec_pipeline(true);
    for _ in 0..2 {
        write_request(&mut pipeline, HttpRequest::new(HttpMethod::GET, "/"));
    }
    sink_bytes(&mut pipeline);
    pipeline
        .feed_inbound(
            b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\naHTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nb",
        )
        .expect("feed");
    assert_eq!(pipeline.drain_received().len(), 2);

    pipeline.fire_channel_inactive();
    let log = log.lock().expect("log lock");
    assert!(
        log.iter().all(|entry| !entry.contains("exception")),
        "unexpected exception entries: {log:?}"
    );
    assert!(log.iter().any(|entry| entry == "app:inactive"));
}

#[test]
fn premature_closure_names_the_missing_count() {
    // 两个 GET、零个响应、通道关闭：异常消息必须点名缺失数量。
    let (mut pipeline, log) = codec_pipeline(true);
    for _ in 0..2 {
        write_request(&mut pipeline, HttpRequest::new(HttpMethod::GET, "/"));
    }
    sink_bytes(&mut pipeline);

    pipeline.fire_channel_inactive();
    let log = log.lock().expect("log lock");
    let exception = log
        .iter()
        .find(|entry| entry.contains("protocol.premature_closure"))
        .expect("premature closure fired");
    assert!(
        exception.contains("2 missing response(s)"),
        "unexpected message: {exception}"
    );
    // 异常先于非活跃事件抵达观察者。
    let exception_index = log.iter().position(|e| e.contains("premature_closure"));
    let inactive_index = log.iter().position(|e| e == "app:inactive");
    assert!(exception_index < inactive_index);
}

#[test]
fn continue_response_does_not_consume_a_queued_method() {
    let (mut pipeline, log) = codec_pipeline(true);
    write_request(
        &mut pipeline,
        HttpRequest::new(HttpMethod::GET, "/big").with_header("Expect", "100-continue"),
    );
    sink_bytes(&mut pipeline);

    pipeline
        .feed_inbound(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
        .expect("feed");
    let mut received = pipeline.drain_received();
    assert_eq!(received.len(), 2);
    let interim = received
        .remove(0)
        .downcast_user::<HttpResponse>()
        .expect("interim response");
    assert_eq!(interim.status().code(), 100);
    let final_response = received
        .remove(0)
        .downcast_user::<HttpResponse>()
        .expect("final response");
    assert_eq!(final_response.content().as_ref(), b"ok");

    // 过渡应答不平衡计数：关闭时不得误报缺失。
    pipeline.fire_channel_inactive();
    let log = log.lock().expect("log lock");
    assert!(log.iter().all(|entry| !entry.contains("premature_closure")));
}

#[test]
fn chunked_request_counts_only_its_last_chunk() {
    // 分块请求在终结块写出前不算"完整发出"，不参与缺失响应统计。
    let (mut pipeline, log) = codec_pipeline(true);
    write_request(
        &mut pipeline,
        HttpRequest::new(HttpMethod::POST, "/upload")
            .with_header("Transfer-Encoding", "chunked")
            .chunked(),
    );
    pipeline
        .write_outbound(PipelineMessage::user(HttpChunk::new(Bytes::from_static(
            b"part",
        ))))
        .expect("write chunk");
    sink_bytes(&mut pipeline);

    pipeline.fire_channel_inactive();
    assert!(
        log.lock()
            .expect("log lock")
            .iter()
            .all(|entry| !entry.contains("premature_closure")),
        "request without last chunk must not count as outstanding"
    );

    // 终结块写出后，同样的关闭就构成一次缺失。
    let (mut pipeline, log) = codec_pipeline(true);
    write_request(
        &mut pipeline,
        HttpRequest::new(HttpMethod::POST, "/upload")
            .with_header("Transfer-Encoding", "chunked")
            .chunked(),
    );
    pipeline
        .write_outbound(PipelineMessage::user(HttpChunk::last()))
        .expect("write last chunk");
    sink_bytes(&mut pipeline);

    pipeline.fire_channel_inactive();
    let log = log.lock().expect("log lock");
    let exception = log
        .iter()
        .find(|entry| entry.contains("protocol.premature_closure"))
        .expect("premature closure fired");
    assert!(exception.contains("1 missing response(s)"));
}
