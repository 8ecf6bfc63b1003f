//! Schema codecs, resolved by mode name through a process-wide registry.
//!
//! `req_map`/`resp_map` modes map whole JSON bodies; `sse_parse` modes
//! transform live SSE streams. Adding a codec means registering its name
//! here; there is no inheritance hierarchy.

mod anthropic;
mod gemini;
mod openai_responses;

use bytes::Bytes;
use futures::stream::BoxStream;

/// Whole-body JSON mapping.
pub type BodyCodec = fn(&[u8]) -> Result<Vec<u8>, String>;

/// Live SSE stream mapping. Input and output are raw SSE byte chunks.
pub type SseCodec =
    fn(BoxStream<'static, Result<Bytes, String>>) -> BoxStream<'static, Result<Bytes, String>>;

/// Request-phase codec for a `req_map` mode.
pub fn lookup_req_map(mode: &str) -> Option<BodyCodec> {
    match mode.trim().to_lowercase().as_str() {
        "openai_chat_to_openai_responses" => Some(openai_responses::chat_to_responses),
        "openai_chat_to_anthropic_messages" => Some(anthropic::chat_to_messages),
        "openai_chat_to_gemini_generate_content" => Some(gemini::chat_to_generate_content),
        "anthropic_to_openai_chat" => Some(anthropic::messages_to_chat),
        "gemini_to_openai_chat" => Some(gemini::generate_content_to_chat),
        _ => None,
    }
}

/// Response-phase codec for a `resp_map` mode.
pub fn lookup_resp_map(mode: &str) -> Option<BodyCodec> {
    match mode.trim().to_lowercase().as_str() {
        "openai_responses_to_openai_chat" => Some(openai_responses::responses_to_chat),
        "anthropic_to_openai_chat" => Some(anthropic::messages_response_to_chat),
        "gemini_to_openai_chat" => Some(gemini::generate_content_response_to_chat),
        "openai_to_anthropic_messages" => Some(anthropic::chat_response_to_messages),
        "openai_to_gemini_chat" | "openai_to_gemini_generate_content" => {
            Some(gemini::chat_response_to_generate_content)
        }
        _ => None,
    }
}

/// Streaming codec for an `sse_parse` mode.
pub fn lookup_sse_parse(mode: &str) -> Option<SseCodec> {
    match mode.trim().to_lowercase().as_str() {
        "openai_responses_to_openai_chat_chunks" => {
            Some(openai_responses::responses_sse_to_chat_chunks)
        }
        "anthropic_to_openai_chunks" => Some(anthropic::messages_sse_to_chat_chunks),
        "openai_to_anthropic_chunks" => Some(anthropic::chat_chunks_sse_to_messages),
        "openai_to_gemini_chunks" => Some(gemini::chat_chunks_sse_to_generate_content),
        "gemini_to_openai_chat_chunks" => Some(gemini::generate_content_sse_to_chat_chunks),
        _ => None,
    }
}

/// Split one SSE line into `(field, value)`.
pub(crate) fn parse_sse_line(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    Some((&line[..colon], line[colon + 1..].trim_start()))
}

/// One parsed SSE event: the optional `event:` name plus the joined `data:`
/// payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Decode a raw SSE byte stream into events. Frames end on a blank line;
/// multiple `data:` lines join with `\n` per the SSE spec.
pub(crate) fn sse_event_stream(
    mut input: BoxStream<'static, Result<Bytes, String>>,
) -> BoxStream<'static, Result<SseEvent, String>> {
    use futures::StreamExt;

    Box::pin(async_stream::stream! {
        let mut buffer = bytes::BytesMut::new();
        let mut current = SseEvent::default();
        while let Some(item) = input.next().await {
            let chunk = match item {
                Ok(b) => b,
                Err(e) => {
                    yield Err(e);
                    break;
                }
            };
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line_raw = buffer.split_to(pos + 1);
                let Ok(line) = std::str::from_utf8(&line_raw) else { continue };
                let line = line.trim_end_matches(['\r', '\n']);
                if line.is_empty() {
                    if current.event.is_some() || !current.data.is_empty() {
                        yield Ok(std::mem::take(&mut current));
                    }
                    continue;
                }
                match parse_sse_line(line) {
                    Some(("event", v)) => current.event = Some(v.to_string()),
                    Some(("data", v)) => {
                        if !current.data.is_empty() {
                            current.data.push('\n');
                        }
                        current.data.push_str(v);
                    }
                    _ => {}
                }
            }
        }
        if current.event.is_some() || !current.data.is_empty() {
            yield Ok(current);
        }
    })
}

/// Frame one `data:` payload as an SSE chunk.
pub(crate) fn sse_data_frame(payload: &str) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

/// Frame an `event:` + `data:` pair as an SSE chunk.
pub(crate) fn sse_event_frame(event: &str, payload: &str) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {payload}\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_all_validated_modes() {
        for mode in [
            "openai_chat_to_openai_responses",
            "openai_chat_to_anthropic_messages",
            "openai_chat_to_gemini_generate_content",
            "anthropic_to_openai_chat",
            "gemini_to_openai_chat",
        ] {
            assert!(lookup_req_map(mode).is_some(), "req_map {mode}");
        }
        for mode in [
            "openai_responses_to_openai_chat",
            "anthropic_to_openai_chat",
            "gemini_to_openai_chat",
            "openai_to_anthropic_messages",
            "openai_to_gemini_chat",
            "openai_to_gemini_generate_content",
        ] {
            assert!(lookup_resp_map(mode).is_some(), "resp_map {mode}");
        }
        for mode in [
            "openai_responses_to_openai_chat_chunks",
            "anthropic_to_openai_chunks",
            "openai_to_anthropic_chunks",
            "openai_to_gemini_chunks",
            "gemini_to_openai_chat_chunks",
        ] {
            assert!(lookup_sse_parse(mode).is_some(), "sse_parse {mode}");
        }
        assert!(lookup_req_map("bogus").is_none());
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("data: {\"a\":1}"), Some(("data", "{\"a\":1}")));
        assert_eq!(parse_sse_line("event: done"), Some(("event", "done")));
        assert_eq!(parse_sse_line("no colon here"), None);
    }
}
