//! OpenAI chat completions <-> Anthropic messages mapping.

use super::{sse_data_frame, sse_event_frame, sse_event_stream};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use uuid::Uuid;

const DEFAULT_MAX_TOKENS: i64 = 4096;

fn parse_object(body: &[u8], what: &str) -> Result<Map<String, Value>, String> {
    let v: Value =
        serde_json::from_slice(body).map_err(|e| format!("parse {what} json: {e}"))?;
    match v {
        Value::Object(m) => Ok(m),
        _ => Err(format!("{what} is not a json object")),
    }
}

fn text_of(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => {
            let mut out = Vec::new();
            for p in parts {
                if p.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(t) = p.get("text").and_then(Value::as_str) {
                        if !t.trim().is_empty() {
                            out.push(t.to_string());
                        }
                    }
                }
            }
            out.join("\n")
        }
        _ => String::new(),
    }
}

fn map_stop_reason_to_finish(stop: &str) -> &'static str {
    match stop {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

fn map_finish_to_stop_reason(finish: &str) -> &'static str {
    match finish {
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        _ => "end_turn",
    }
}

/// `openai_chat_to_anthropic_messages`: chat request -> messages request.
pub fn chat_to_messages(body: &[u8]) -> Result<Vec<u8>, String> {
    let root = parse_object(body, "chat request")?;
    let model = root.get("model").and_then(Value::as_str).unwrap_or_default();
    if model.trim().is_empty() {
        return Err("model is required".to_string());
    }

    let mut system = Vec::new();
    let mut messages = Vec::new();
    if let Some(list) = root.get("messages").and_then(Value::as_array) {
        for msg in list {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or_default();
            match role {
                "system" | "developer" => {
                    let t = text_of(msg.get("content").unwrap_or(&Value::Null));
                    if !t.is_empty() {
                        system.push(t);
                    }
                }
                "tool" => {
                    let call_id =
                        msg.get("tool_call_id").and_then(Value::as_str).unwrap_or_default();
                    messages.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": call_id,
                            "content": text_of(msg.get("content").unwrap_or(&Value::Null)),
                        }],
                    }));
                }
                "assistant" => {
                    let mut blocks = Vec::new();
                    let t = text_of(msg.get("content").unwrap_or(&Value::Null));
                    if !t.is_empty() {
                        blocks.push(json!({"type": "text", "text": t}));
                    }
                    if let Some(calls) = msg.get("tool_calls").and_then(Value::as_array) {
                        for call in calls {
                            let Some(f) = call.get("function") else { continue };
                            let name = f.get("name").and_then(Value::as_str).unwrap_or_default();
                            if name.is_empty() {
                                continue;
                            }
                            let input: Value = f
                                .get("arguments")
                                .and_then(Value::as_str)
                                .and_then(|a| serde_json::from_str(a).ok())
                                .unwrap_or_else(|| json!({}));
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.get("id").cloned().unwrap_or(json!("")),
                                "name": name,
                                "input": input,
                            }));
                        }
                    }
                    if !blocks.is_empty() {
                        messages.push(json!({"role": "assistant", "content": blocks}));
                    }
                }
                _ => messages.push(json!({
                    "role": "user",
                    "content": text_of(msg.get("content").unwrap_or(&Value::Null)),
                })),
            }
        }
    }

    let mut out = Map::new();
    out.insert("model".to_string(), json!(model));
    out.insert("messages".to_string(), Value::Array(messages));
    let max_tokens = root
        .get("max_tokens")
        .or_else(|| root.get("max_completion_tokens"))
        .and_then(Value::as_i64)
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_TOKENS);
    out.insert("max_tokens".to_string(), json!(max_tokens));
    if !system.is_empty() {
        out.insert("system".to_string(), json!(system.join("\n")));
    }
    if let Some(stream) = root.get("stream").and_then(Value::as_bool) {
        out.insert("stream".to_string(), json!(stream));
    }
    for carry in ["temperature", "top_p", "stop_sequences"] {
        if let Some(v) = root.get(carry) {
            out.insert(carry.to_string(), v.clone());
        }
    }
    serde_json::to_vec(&out).map_err(|e| e.to_string())
}

/// `anthropic_to_openai_chat`: messages request -> chat request.
pub fn messages_to_chat(body: &[u8]) -> Result<Vec<u8>, String> {
    let root = parse_object(body, "messages request")?;
    let model = root.get("model").and_then(Value::as_str).unwrap_or_default();
    if model.trim().is_empty() {
        return Err("model is required".to_string());
    }

    let mut out_messages: Vec<Value> = Vec::new();
    match root.get("system") {
        Some(Value::String(s)) if !s.trim().is_empty() => {
            out_messages.push(json!({"role": "system", "content": s}));
        }
        Some(Value::Array(parts)) => {
            let joined = text_of(&Value::Array(parts.clone()));
            if !joined.is_empty() {
                out_messages.push(json!({"role": "system", "content": joined}));
            }
        }
        _ => {}
    }

    if let Some(list) = root.get("messages").and_then(Value::as_array) {
        for msg in list {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or_default();
            if role.is_empty() {
                continue;
            }
            let content = msg.get("content").unwrap_or(&Value::Null);
            let Some(parts) = content.as_array() else {
                out_messages.push(json!({"role": role, "content": content.clone()}));
                continue;
            };

            let mut texts = Vec::new();
            let mut tool_calls = Vec::new();
            let mut tool_messages = Vec::new();
            for p in parts {
                match p.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        let t = p.get("text").and_then(Value::as_str).unwrap_or_default();
                        if !t.trim().is_empty() {
                            texts.push(t.to_string());
                        }
                    }
                    Some("tool_use") => {
                        let name = p.get("name").and_then(Value::as_str).unwrap_or_default();
                        if name.is_empty() {
                            continue;
                        }
                        let args = p
                            .get("input")
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "{}".to_string());
                        tool_calls.push(json!({
                            "id": p.get("id").cloned().unwrap_or(json!("")),
                            "type": "function",
                            "function": {"name": name, "arguments": args},
                        }));
                    }
                    Some("tool_result") => {
                        let call_id =
                            p.get("tool_use_id").and_then(Value::as_str).unwrap_or_default();
                        if call_id.is_empty() {
                            continue;
                        }
                        let output = match p.get("content") {
                            Some(Value::String(s)) => s.clone(),
                            Some(other) => other.to_string(),
                            None => String::new(),
                        };
                        tool_messages.push(json!({
                            "role": "tool",
                            "tool_call_id": call_id,
                            "content": output,
                        }));
                    }
                    _ => {}
                }
            }

            let mut item = json!({"role": role, "content": texts.join("\n")});
            if !tool_calls.is_empty() {
                item["tool_calls"] = Value::Array(tool_calls);
            }
            out_messages.push(item);
            out_messages.extend(tool_messages);
        }
    }

    let mut out = Map::new();
    out.insert("model".to_string(), json!(model));
    out.insert("messages".to_string(), Value::Array(out_messages));
    if let Some(Value::Bool(s)) = root.get("stream") {
        out.insert("stream".to_string(), json!(s));
    }
    if let Some(v) = root.get("max_tokens").and_then(Value::as_i64).filter(|v| *v > 0) {
        out.insert("max_tokens".to_string(), json!(v));
    }
    serde_json::to_vec(&out).map_err(|e| e.to_string())
}

/// `anthropic_to_openai_chat` (response direction): messages response ->
/// chat response.
pub fn messages_response_to_chat(body: &[u8]) -> Result<Vec<u8>, String> {
    let root = parse_object(body, "messages response")?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    if let Some(blocks) = root.get("content").and_then(Value::as_array) {
        for b in blocks {
            match b.get("type").and_then(Value::as_str) {
                Some("text") => {
                    text.push_str(b.get("text").and_then(Value::as_str).unwrap_or_default())
                }
                Some("tool_use") => tool_calls.push(json!({
                    "id": b.get("id").cloned().unwrap_or(json!("")),
                    "type": "function",
                    "function": {
                        "name": b.get("name").cloned().unwrap_or(json!("")),
                        "arguments": b.get("input").map(|v| v.to_string()).unwrap_or_else(|| "{}".to_string()),
                    },
                })),
                _ => {}
            }
        }
    }

    let stop = root.get("stop_reason").and_then(Value::as_str).unwrap_or("end_turn");
    let mut message = json!({"role": "assistant", "content": text});
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
        message["content"] = Value::Null;
    }

    let usage_in = root.get("usage").and_then(|v| v.get("input_tokens")).and_then(Value::as_i64).unwrap_or(0);
    let usage_out = root.get("usage").and_then(|v| v.get("output_tokens")).and_then(Value::as_i64).unwrap_or(0);

    let out = json!({
        "id": root.get("id").cloned().unwrap_or_else(|| json!(format!("chatcmpl-{}", Uuid::new_v4()))),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": root.get("model").cloned().unwrap_or(json!("")),
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": map_stop_reason_to_finish(stop),
        }],
        "usage": {
            "prompt_tokens": usage_in,
            "completion_tokens": usage_out,
            "total_tokens": usage_in + usage_out,
        },
    });
    serde_json::to_vec(&out).map_err(|e| e.to_string())
}

/// `openai_to_anthropic_messages`: chat response -> messages response.
pub fn chat_response_to_messages(body: &[u8]) -> Result<Vec<u8>, String> {
    let root = parse_object(body, "chat response")?;
    let choices = root.get("choices").and_then(Value::as_array);
    let Some(choice0) = choices.and_then(|c| c.first()) else {
        return Err("choices is required".to_string());
    };
    let Some(msg) = choice0.get("message").and_then(Value::as_object) else {
        return Err("invalid choices[0].message".to_string());
    };

    let mut content = Vec::new();
    let tool_calls = msg.get("tool_calls").and_then(Value::as_array);
    if let Some(calls) = tool_calls.filter(|c| !c.is_empty()) {
        for call in calls {
            let Some(f) = call.get("function").and_then(Value::as_object) else { continue };
            let name = f.get("name").and_then(Value::as_str).unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            let input: Value = f
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|a| serde_json::from_str::<Value>(a).ok())
                .filter(Value::is_object)
                .unwrap_or_else(|| json!({}));
            content.push(json!({
                "type": "tool_use",
                "id": call.get("id").cloned().unwrap_or(json!("")),
                "name": name,
                "input": input,
            }));
        }
    } else {
        let text = msg.get("content").and_then(Value::as_str).unwrap_or_default();
        content.push(json!({"type": "text", "text": text}));
    }

    let finish = choice0.get("finish_reason").and_then(Value::as_str).unwrap_or_default();
    let mut out = json!({
        "id": root.get("id").cloned().unwrap_or(json!("")),
        "type": "message",
        "role": "assistant",
        "model": root.get("model").cloned().unwrap_or(json!("")),
        "content": content,
        "stop_reason": map_finish_to_stop_reason(finish),
    });
    if let Some(u) = root.get("usage").and_then(Value::as_object) {
        let input = u
            .get("prompt_tokens")
            .or_else(|| u.get("input_tokens"))
            .cloned()
            .unwrap_or(json!(0));
        let output = u
            .get("completion_tokens")
            .or_else(|| u.get("output_tokens"))
            .cloned()
            .unwrap_or(json!(0));
        out["usage"] = json!({"input_tokens": input, "output_tokens": output});
    }
    serde_json::to_vec(&out).map_err(|e| e.to_string())
}

/// `anthropic_to_openai_chunks`: messages SSE -> chat chunk SSE.
pub fn messages_sse_to_chat_chunks(
    input: BoxStream<'static, Result<Bytes, String>>,
) -> BoxStream<'static, Result<Bytes, String>> {
    let mut events = sse_event_stream(input);
    let stream_id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = Utc::now().timestamp();

    Box::pin(async_stream::stream! {
        let mut model = String::new();
        let mut input_tokens: i64 = 0;
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(e) => e,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if event.data.is_empty() {
                continue;
            }
            let Ok(payload) = serde_json::from_str::<Value>(&event.data) else {
                continue;
            };
            let kind = payload
                .get("type")
                .and_then(Value::as_str)
                .map(String::from)
                .or(event.event)
                .unwrap_or_default();

            match kind.as_str() {
                "message_start" => {
                    if let Some(m) = payload.pointer("/message/model").and_then(Value::as_str) {
                        model = m.to_string();
                    }
                    input_tokens = payload
                        .pointer("/message/usage/input_tokens")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    let chunk = json!({
                        "id": &stream_id,
                        "object": "chat.completion.chunk",
                        "created": created,
                        "model": &model,
                        "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": Value::Null}],
                    });
                    yield Ok(sse_data_frame(&chunk.to_string()));
                }
                "content_block_delta" => {
                    let text = payload
                        .pointer("/delta/text")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if text.is_empty() {
                        continue;
                    }
                    let chunk = json!({
                        "id": &stream_id,
                        "object": "chat.completion.chunk",
                        "created": created,
                        "model": &model,
                        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": Value::Null}],
                    });
                    yield Ok(sse_data_frame(&chunk.to_string()));
                }
                "message_delta" => {
                    let stop = payload
                        .pointer("/delta/stop_reason")
                        .and_then(Value::as_str)
                        .unwrap_or("end_turn");
                    let output_tokens = payload
                        .pointer("/usage/output_tokens")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    let final_chunk = json!({
                        "id": &stream_id,
                        "object": "chat.completion.chunk",
                        "created": created,
                        "model": &model,
                        "choices": [{"index": 0, "delta": {}, "finish_reason": map_stop_reason_to_finish(stop)}],
                        "usage": {
                            "prompt_tokens": input_tokens,
                            "completion_tokens": output_tokens,
                            "total_tokens": input_tokens + output_tokens,
                        },
                    });
                    yield Ok(sse_data_frame(&final_chunk.to_string()));
                }
                _ => {}
            }
        }
        yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
    })
}

/// `openai_to_anthropic_chunks`: chat chunk SSE -> messages SSE.
pub fn chat_chunks_sse_to_messages(
    input: BoxStream<'static, Result<Bytes, String>>,
) -> BoxStream<'static, Result<Bytes, String>> {
    let mut events = sse_event_stream(input);
    let message_id = format!("msg_{}", Uuid::new_v4().simple());

    Box::pin(async_stream::stream! {
        let mut started = false;
        let mut block_open = false;
        let mut finish_reason = String::new();
        let mut output_tokens: i64 = 0;
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(e) => e,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if event.data.is_empty() || event.data == "[DONE]" {
                continue;
            }
            let Ok(payload) = serde_json::from_str::<Value>(&event.data) else {
                continue;
            };

            if !started {
                started = true;
                let model = payload.get("model").cloned().unwrap_or(json!(""));
                let start = json!({
                    "type": "message_start",
                    "message": {
                        "id": &message_id,
                        "type": "message",
                        "role": "assistant",
                        "model": model,
                        "content": [],
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    },
                });
                yield Ok(sse_event_frame("message_start", &start.to_string()));
            }

            if let Some(u) = payload.get("usage").and_then(Value::as_object) {
                if let Some(v) = u.get("completion_tokens").and_then(Value::as_i64) {
                    output_tokens = v;
                }
            }

            let Some(choice0) = payload.get("choices").and_then(Value::as_array).and_then(|c| c.first())
            else {
                continue;
            };
            if let Some(f) = choice0.get("finish_reason").and_then(Value::as_str) {
                if !f.is_empty() {
                    finish_reason = f.to_string();
                }
            }
            let text = choice0
                .pointer("/delta/content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !text.is_empty() {
                if !block_open {
                    block_open = true;
                    let start = json!({
                        "type": "content_block_start",
                        "index": 0,
                        "content_block": {"type": "text", "text": ""},
                    });
                    yield Ok(sse_event_frame("content_block_start", &start.to_string()));
                }
                let delta = json!({
                    "type": "content_block_delta",
                    "index": 0,
                    "delta": {"type": "text_delta", "text": text},
                });
                yield Ok(sse_event_frame("content_block_delta", &delta.to_string()));
            }
        }

        if block_open {
            let stop = json!({"type": "content_block_stop", "index": 0});
            yield Ok(sse_event_frame("content_block_stop", &stop.to_string()));
        }
        if started {
            let delta = json!({
                "type": "message_delta",
                "delta": {"stop_reason": map_finish_to_stop_reason(&finish_reason)},
                "usage": {"output_tokens": output_tokens},
            });
            yield Ok(sse_event_frame("message_delta", &delta.to_string()));
            let stop = json!({"type": "message_stop"});
            yield Ok(sse_event_frame("message_stop", &stop.to_string()));
        }
    })
}
