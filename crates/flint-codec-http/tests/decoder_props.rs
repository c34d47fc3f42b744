//! 解码器分片不变量：输入在任意字节边界切割，解码出的响应序列
//! （状态码、主体形态、主体内容）保持不变。

use bytes::BytesMut;
use flint_codec_http::{HttpCodecConfig, HttpObject, ResponseDecoder};
use proptest::prelude::*;

/// 三个相邻响应：定长主体、空主体、分块主体。
const WIRE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello\
HTTP/1.1 204 No Content\r\n\r\n\
HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n5\r\npedia\r\n0\r\n\r\n";

/// 把对象序列折叠为与分块边界无关的规范形态。
fn normalize(objects: &[HttpObject]) -> Vec<(u16, bool, Vec<u8>)> {
    let mut result: Vec<(u16, bool, Vec<u8>)> = Vec::new();
    for object in objects {
        match object {
            HttpObject::Response(response) => result.push((
                response.status().code(),
                response.is_chunked(),
                response.content().to_vec(),
            )),
            HttpObject::Chunk(chunk) => {
                let (_, _, body) = result.last_mut().expect("chunk follows its response");
                body.extend_from_slice(chunk.data());
            }
        }
    }
    result
}

fn decode_in_segments(cut_points: &[usize]) -> Vec<HttpObject> {
    let mut cuts: Vec<usize> = cut_points.to_vec();
    cuts.sort_unstable();
    cuts.dedup();
    let mut decoder = ResponseDecoder::new(HttpCodecConfig::default());
    let mut src = BytesMut::new();
    let mut out = Vec::new();
    let mut start = 0;
    for cut in cuts.into_iter().chain(std::iter::once(WIRE.len())) {
        if cut <= start {
            continue;
        }
        src.extend_from_slice(&WIRE[start..cut]);
        decoder.decode(&mut src, &mut out).expect("decode segment");
        start = cut;
    }
    out
}

proptest! {
    #[test]
    fn arbitrary_segmentation_preserves_semantics(
        cuts in proptest::collection::vec(0usize..WIRE.len(), 0..8)
    ) {
        let whole = decode_in_segments(&[]);
        let segmented = decode_in_segments(&cuts);
        prop_assert_eq!(normalize(&whole), normalize(&segmented));
    }
}

#[test]
fn reference_wire_decodes_into_three_responses() {
    let objects = decode_in_segments(&[]);
    let normalized = normalize(&objects);
    assert_eq!(
        normalized,
        vec![
            (200, false, b"hello".to_vec()),
            (204, false, Vec::new()),
            (200, true, b"wikipedia".to_vec()),
        ]
    );
}
