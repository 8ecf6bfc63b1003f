//! The stream engine: gzip handling, SSE transformation, and the tees that
//! feed the usage tail and traffic dump while bytes flow downstream.
//!
//! Downstream byte order always equals the (possibly codec-transformed)
//! upstream order; tees observe, they never reorder.

use crate::dsl::{JsonOp, ResponseDirective, ResponseOp, SseJsonDelIf};
use crate::meta::Meta;
use crate::proxy::codecs;
use crate::proxy::executor::apply_json_ops;
use crate::trafficdump::LimitedBuffer;
use crate::usage::TailBuffer;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use onr_types::ProxyError;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Instant;

const CONTENT_ENCODING_GZIP: &str = "gzip";
const CONTENT_ENCODING_IDENTITY: &str = "identity";

/// Capture state shared between the flowing stream and the request's
/// post-stream bookkeeping (usage extraction, dump, metrics, access log).
#[derive(Debug)]
pub struct StreamState {
    pub usage_tail: TailBuffer,
    pub upstream_dump: LimitedBuffer,
    pub proxy_dump: LimitedBuffer,
    pub first_byte_at: Option<Instant>,
    pub last_byte_at: Option<Instant>,
    pub bytes_written: u64,
    pub completed: bool,
    pub error: Option<String>,
}

impl StreamState {
    pub fn new(dump_limit: usize) -> Self {
        Self {
            usage_tail: TailBuffer::default(),
            upstream_dump: LimitedBuffer::new(dump_limit),
            proxy_dump: LimitedBuffer::new(dump_limit),
            first_byte_at: None,
            last_byte_at: None,
            bytes_written: 0,
            completed: false,
            error: None,
        }
    }
}

pub type SharedStreamState = Arc<Mutex<StreamState>>;

pub fn shared_state(dump_limit: usize) -> SharedStreamState {
    Arc::new(Mutex::new(StreamState::new(dump_limit)))
}

/// The transformed downstream body plus the header adjustments it requires.
pub struct StreamPlan {
    pub body: BoxStream<'static, Result<Bytes, String>>,
    /// `Content-Encoding` (and `Content-Length`) must be dropped because
    /// the bytes no longer match the upstream framing.
    pub strip_content_encoding: bool,
    pub content_type_override: Option<&'static str>,
}

impl std::fmt::Debug for StreamPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPlan")
            .field("body", &"BoxStream")
            .field("strip_content_encoding", &self.strip_content_encoding)
            .field("content_type_override", &self.content_type_override)
            .finish()
    }
}

/// Build the downstream stream for one upstream response body.
pub fn transform_stream(
    upstream: BoxStream<'static, Result<Bytes, String>>,
    content_encoding: &str,
    dir: &ResponseDirective,
    meta: &Meta,
    state: SharedStreamState,
) -> Result<StreamPlan, ProxyError> {
    let needs_sse_ops = !dir.json_ops.is_empty() || !dir.sse_del_if.is_empty();
    let codec = match &dir.op {
        ResponseOp::SseParse(mode) => Some(codecs::lookup_sse_parse(mode).ok_or_else(|| {
            ProxyError::Internal { message: format!("unknown sse_parse mode {mode:?}") }
        })?),
        _ => None,
    };
    let transforming = needs_sse_ops || codec.is_some();

    let ce = content_encoding.trim().to_lowercase();
    let mut strip_content_encoding = false;
    let mut src: BoxStream<'static, Result<Bytes, String>> = upstream;
    if transforming {
        if ce == CONTENT_ENCODING_GZIP {
            src = gunzip_stream(src);
            strip_content_encoding = true;
        } else if !ce.is_empty() && ce != CONTENT_ENCODING_IDENTITY {
            return Err(ProxyError::Internal {
                message: format!("cannot transform encoded upstream response (Content-Encoding={ce:?})"),
            });
        }
    }

    // upstream dump sees pre-codec bytes
    src = tee(src, state.clone(), TeePoint::UpstreamDump);

    let mut content_type_override = None;
    if let Some(codec) = codec {
        src = codec(src);
        content_type_override = Some("text/event-stream");
        strip_content_encoding = true;
    }

    // usage tail reads post-codec, pre-response-ops bytes
    src = tee(src, state.clone(), TeePoint::UsageTail);

    if needs_sse_ops {
        src = sse_ops_stream(src, dir.sse_del_if.clone(), dir.json_ops.clone(), meta.clone());
        strip_content_encoding = true;
    }

    let body = finalize(src, state);
    Ok(StreamPlan { body, strip_content_encoding, content_type_override })
}

enum TeePoint {
    UpstreamDump,
    UsageTail,
}

fn tee(
    mut input: BoxStream<'static, Result<Bytes, String>>,
    state: SharedStreamState,
    point: TeePoint,
) -> BoxStream<'static, Result<Bytes, String>> {
    Box::pin(async_stream::stream! {
        while let Some(item) = input.next().await {
            if let Ok(chunk) = &item {
                let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
                match point {
                    TeePoint::UpstreamDump => st.upstream_dump.write(chunk),
                    TeePoint::UsageTail => st.usage_tail.write(chunk),
                }
            }
            yield item;
        }
    })
}

/// Terminal wrapper: records pacing, the proxy-side dump, and completion.
fn finalize(
    mut input: BoxStream<'static, Result<Bytes, String>>,
    state: SharedStreamState,
) -> BoxStream<'static, Result<Bytes, String>> {
    Box::pin(async_stream::stream! {
        while let Some(item) = input.next().await {
            match item {
                Ok(chunk) => {
                    {
                        let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
                        let now = Instant::now();
                        if st.first_byte_at.is_none() {
                            st.first_byte_at = Some(now);
                        }
                        st.last_byte_at = Some(now);
                        st.bytes_written += chunk.len() as u64;
                        st.proxy_dump.write(&chunk);
                    }
                    yield Ok(chunk);
                }
                Err(e) => {
                    {
                        let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
                        st.error = Some(e.clone());
                    }
                    yield Err(e);
                    return;
                }
            }
        }
        let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
        st.completed = true;
    })
}

/// Streaming gzip inflate. A malformed stream surfaces as a stream error.
fn gunzip_stream(
    mut input: BoxStream<'static, Result<Bytes, String>>,
) -> BoxStream<'static, Result<Bytes, String>> {
    use flate2::write::GzDecoder;
    use std::io::Write;

    #[derive(Default)]
    struct SinkBuf(Vec<u8>);
    impl Write for SinkBuf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    Box::pin(async_stream::stream! {
        let mut decoder = GzDecoder::new(SinkBuf::default());
        while let Some(item) = input.next().await {
            let chunk = match item {
                Ok(b) => b,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if let Err(e) = decoder.write_all(&chunk) {
                yield Err(format!("gzip decode: {e}"));
                return;
            }
            if let Err(e) = decoder.flush() {
                yield Err(format!("gzip decode: {e}"));
                return;
            }
            let out = std::mem::take(&mut decoder.get_mut().0);
            if !out.is_empty() {
                yield Ok(Bytes::from(out));
            }
        }
        match decoder.finish() {
            Ok(sink) => {
                if !sink.0.is_empty() {
                    yield Ok(Bytes::from(sink.0));
                }
            }
            Err(e) => yield Err(format!("gzip decode: {e}")),
        }
    })
}

/// Apply `sse_json_del_if` rules and JSON ops to each SSE `data:` payload,
/// re-serializing in place. Non-JSON payloads and non-data lines pass
/// through untouched.
fn sse_ops_stream(
    mut input: BoxStream<'static, Result<Bytes, String>>,
    del_rules: Vec<SseJsonDelIf>,
    ops: Vec<JsonOp>,
    meta: Meta,
) -> BoxStream<'static, Result<Bytes, String>> {
    Box::pin(async_stream::stream! {
        let mut buffer = BytesMut::new();
        while let Some(item) = input.next().await {
            let chunk = match item {
                Ok(b) => b,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);
            let mut out = BytesMut::new();
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line_raw = buffer.split_to(pos + 1);
                out.extend_from_slice(&transform_sse_line(&line_raw, &del_rules, &ops, &meta));
            }
            if !out.is_empty() {
                yield Ok(out.freeze());
            }
        }
        if !buffer.is_empty() {
            yield Ok(Bytes::from(transform_sse_line(&buffer, &del_rules, &ops, &meta)));
        }
    })
}

fn transform_sse_line(
    line_raw: &[u8],
    del_rules: &[SseJsonDelIf],
    ops: &[JsonOp],
    meta: &Meta,
) -> Vec<u8> {
    let Ok(line) = std::str::from_utf8(line_raw) else {
        return line_raw.to_vec();
    };
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let Some(payload) = trimmed.strip_prefix("data:").map(str::trim_start) else {
        return line_raw.to_vec();
    };
    let Ok(mut root) = serde_json::from_str::<Value>(payload) else {
        return line_raw.to_vec();
    };
    for rule in del_rules {
        let cond = crate::jsonutil::get_string(&root, &rule.cond_path);
        if cond == rule.equals {
            let _ = crate::jsonutil::delete_value(&mut root, &rule.del_path);
        }
    }
    if apply_json_ops(ops, meta, &mut root).is_err() {
        return line_raw.to_vec();
    }
    format!("data: {root}\n").into_bytes()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::ResponseOp;

    fn byte_stream(parts: Vec<&'static [u8]>) -> BoxStream<'static, Result<Bytes, String>> {
        Box::pin(futures::stream::iter(
            parts.into_iter().map(|p| Ok(Bytes::from_static(p))).collect::<Vec<_>>(),
        ))
    }

    async fn collect(plan: StreamPlan) -> Vec<u8> {
        let chunks: Vec<Bytes> = plan.body.map(|r| r.unwrap()).collect().await;
        chunks.concat()
    }

    #[tokio::test]
    async fn test_passthrough_preserves_bytes_and_fills_tees() {
        let dir = ResponseDirective { op: ResponseOp::Passthrough, ..Default::default() };
        let meta = Meta::new("chat.completions", true);
        let state = shared_state(1024);

        let input = byte_stream(vec![b"data: {\"a\":1}\n\n", b"data: [DONE]\n\n"]);
        let plan = transform_stream(input, "", &dir, &meta, state.clone()).unwrap();
        assert!(!plan.strip_content_encoding);

        let out = collect(plan).await;
        assert_eq!(out, b"data: {\"a\":1}\n\ndata: [DONE]\n\n".to_vec());

        let st = state.lock().unwrap();
        assert!(st.completed);
        assert_eq!(st.bytes_written, out.len() as u64);
        assert_eq!(st.usage_tail.bytes(), &out[..]);
        assert_eq!(st.upstream_dump.bytes(), &out[..]);
        assert_eq!(st.proxy_dump.bytes(), &out[..]);
        assert!(st.first_byte_at.is_some());
    }

    #[tokio::test]
    async fn test_sse_del_if_removes_field_conditionally() {
        let dir = ResponseDirective {
            op: ResponseOp::Passthrough,
            sse_del_if: vec![SseJsonDelIf {
                cond_path: "$.type".to_string(),
                equals: "ping".to_string(),
                del_path: "$.secret".to_string(),
            }],
            ..Default::default()
        };
        let meta = Meta::new("chat.completions", true);
        let state = shared_state(1024);

        let input = byte_stream(vec![
            b"data: {\"type\":\"ping\",\"secret\":1}\n\n",
            b"data: {\"type\":\"other\",\"secret\":2}\n\n",
        ]);
        let plan = transform_stream(input, "", &dir, &meta, state).unwrap();
        assert!(plan.strip_content_encoding);
        let out = String::from_utf8(collect(plan).await).unwrap();
        let first_event = out.split("\n\n").next().unwrap();
        assert!(!first_event.contains("secret"), "{out}");
        assert!(out.contains("\"secret\":2"));
    }

    #[tokio::test]
    async fn test_sse_ops_leave_non_json_lines_alone() {
        let dir = ResponseDirective {
            json_ops: vec![JsonOp::Del { path: "$.drop".to_string() }],
            ..Default::default()
        };
        let meta = Meta::new("chat.completions", true);
        let state = shared_state(1024);

        let input = byte_stream(vec![
            b"event: message\ndata: {\"drop\":1,\"keep\":2}\n\ndata: [DONE]\n\n",
        ]);
        let plan = transform_stream(input, "", &dir, &meta, state).unwrap();
        let out = String::from_utf8(collect(plan).await).unwrap();
        assert!(out.contains("event: message\n"));
        assert!(!out.contains("drop"));
        assert!(out.contains("\"keep\":2"));
        assert!(out.contains("data: [DONE]"));
    }

    #[tokio::test]
    async fn test_gzip_decode_for_transforming_pipeline() {
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"data: {\"type\":\"ping\",\"x\":1}\n\n").unwrap();
        let gz = enc.finish().unwrap();

        let dir = ResponseDirective {
            sse_del_if: vec![SseJsonDelIf {
                cond_path: "$.type".to_string(),
                equals: "ping".to_string(),
                del_path: "$.x".to_string(),
            }],
            ..Default::default()
        };
        let meta = Meta::new("chat.completions", true);
        let state = shared_state(1024);

        let input: BoxStream<'static, Result<Bytes, String>> =
            Box::pin(futures::stream::iter(vec![Ok(Bytes::from(gz))]));
        let plan = transform_stream(input, "gzip", &dir, &meta, state).unwrap();
        assert!(plan.strip_content_encoding);
        let out = String::from_utf8(collect(plan).await).unwrap();
        assert!(!out.contains("\"x\""), "{out}");
    }

    #[tokio::test]
    async fn test_unsupported_encoding_on_transforming_pipeline_errors() {
        let dir = ResponseDirective {
            json_ops: vec![JsonOp::Del { path: "$.x".to_string() }],
            ..Default::default()
        };
        let meta = Meta::new("chat.completions", true);
        let input = byte_stream(vec![b"x"]);
        let err = transform_stream(input, "br", &dir, &meta, shared_state(64)).unwrap_err();
        assert!(matches!(err, ProxyError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_codec_pipeline_tees_post_codec_bytes_into_tail() {
        let dir = ResponseDirective {
            op: ResponseOp::SseParse("openai_responses_to_openai_chat_chunks".to_string()),
            ..Default::default()
        };
        let meta = Meta::new("responses", true);
        let state = shared_state(64 * 1024);

        let upstream = concat!(
            "event: response.output_text.delta\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"hey\"}\n\n",
            "event: response.completed\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"usage\":{\"input_tokens\":1,\"output_tokens\":2}}}\n\n",
        );
        let input: BoxStream<'static, Result<Bytes, String>> =
            Box::pin(futures::stream::iter(vec![Ok(Bytes::from(upstream))]));
        let plan = transform_stream(input, "", &dir, &meta, state.clone()).unwrap();
        assert_eq!(plan.content_type_override, Some("text/event-stream"));

        let out = String::from_utf8(collect(plan).await).unwrap();
        assert!(out.contains("chat.completion.chunk"));
        assert!(out.trim_end().ends_with("data: [DONE]"));

        let st = state.lock().unwrap();
        // upstream dump holds raw responses-API frames, tail holds chat chunks
        let upstream_dump = String::from_utf8_lossy(st.upstream_dump.bytes()).into_owned();
        let tail = String::from_utf8_lossy(st.usage_tail.bytes()).into_owned();
        assert!(upstream_dump.contains("response.output_text.delta"));
        assert!(tail.contains("chat.completion.chunk"));
        assert!(tail.contains("\"total_tokens\":3"));
    }
}
