//! OpenAI chat completions <-> OpenAI responses API mapping.

use super::{sse_data_frame, sse_event_stream};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use uuid::Uuid;

fn parse_object(body: &[u8], what: &str) -> Result<Map<String, Value>, String> {
    let v: Value =
        serde_json::from_slice(body).map_err(|e| format!("parse {what} json: {e}"))?;
    match v {
        Value::Object(m) => Ok(m),
        _ => Err(format!("{what} is not a json object")),
    }
}

fn content_as_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => {
            let mut out = String::new();
            for p in parts {
                if let Some(t) = p.get("text").and_then(Value::as_str) {
                    out.push_str(t);
                }
            }
            out
        }
        _ => String::new(),
    }
}

/// `openai_chat_to_openai_responses`: chat request -> responses request.
pub fn chat_to_responses(body: &[u8]) -> Result<Vec<u8>, String> {
    let root = parse_object(body, "chat request")?;
    let model = root.get("model").and_then(Value::as_str).unwrap_or_default();
    if model.trim().is_empty() {
        return Err("model is required".to_string());
    }

    let mut input = Vec::new();
    let mut instructions = String::new();
    if let Some(messages) = root.get("messages").and_then(Value::as_array) {
        for msg in messages {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or_default();
            let text = content_as_text(msg.get("content").unwrap_or(&Value::Null));
            match role {
                "system" | "developer" => {
                    if !instructions.is_empty() {
                        instructions.push('\n');
                    }
                    instructions.push_str(&text);
                }
                "assistant" => input.push(json!({
                    "role": "assistant",
                    "content": [{"type": "output_text", "text": text}],
                })),
                _ => input.push(json!({
                    "role": role,
                    "content": [{"type": "input_text", "text": text}],
                })),
            }
        }
    }

    let mut out = Map::new();
    out.insert("model".to_string(), json!(model));
    out.insert("input".to_string(), Value::Array(input));
    if !instructions.is_empty() {
        out.insert("instructions".to_string(), json!(instructions));
    }
    if let Some(stream) = root.get("stream").and_then(Value::as_bool) {
        out.insert("stream".to_string(), json!(stream));
    }
    if let Some(v) = root.get("max_tokens").or_else(|| root.get("max_completion_tokens")) {
        out.insert("max_output_tokens".to_string(), v.clone());
    }
    for carry in ["temperature", "top_p", "metadata"] {
        if let Some(v) = root.get(carry) {
            out.insert(carry.to_string(), v.clone());
        }
    }
    serde_json::to_vec(&out).map_err(|e| e.to_string())
}

/// `openai_responses_to_openai_chat`: unary responses body -> chat body.
pub fn responses_to_chat(body: &[u8]) -> Result<Vec<u8>, String> {
    let root = parse_object(body, "responses body")?;

    let mut text = String::new();
    if let Some(output) = root.get("output").and_then(Value::as_array) {
        for item in output {
            if item.get("type").and_then(Value::as_str) != Some("message") {
                continue;
            }
            if let Some(parts) = item.get("content").and_then(Value::as_array) {
                for p in parts {
                    if p.get("type").and_then(Value::as_str) == Some("output_text") {
                        text.push_str(p.get("text").and_then(Value::as_str).unwrap_or_default());
                    }
                }
            }
        }
    }
    // convenience shortcut emitted by some providers
    if text.is_empty() {
        if let Some(t) = root.get("output_text").and_then(Value::as_str) {
            text.push_str(t);
        }
    }

    let finish_reason = match root.get("incomplete_details").and_then(|d| d.get("reason")) {
        Some(Value::String(r)) if r == "max_output_tokens" => "length",
        _ => "stop",
    };

    let mut usage = Map::new();
    if let Some(u) = root.get("usage").and_then(Value::as_object) {
        let input = u.get("input_tokens").cloned().unwrap_or(json!(0));
        let output = u.get("output_tokens").cloned().unwrap_or(json!(0));
        let total = u.get("total_tokens").cloned().unwrap_or(json!(
            input.as_i64().unwrap_or(0) + output.as_i64().unwrap_or(0)
        ));
        usage.insert("prompt_tokens".to_string(), input);
        usage.insert("completion_tokens".to_string(), output);
        usage.insert("total_tokens".to_string(), total);
    }

    let out = json!({
        "id": root.get("id").cloned().unwrap_or_else(|| json!(format!("chatcmpl-{}", Uuid::new_v4()))),
        "object": "chat.completion",
        "created": root.get("created_at").cloned().unwrap_or_else(|| json!(Utc::now().timestamp())),
        "model": root.get("model").cloned().unwrap_or(json!("")),
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": finish_reason,
        }],
        "usage": usage,
    });
    serde_json::to_vec(&out).map_err(|e| e.to_string())
}

/// `openai_responses_to_openai_chat_chunks`: responses SSE -> chat chunk
/// SSE, ending with `data: [DONE]`.
pub fn responses_sse_to_chat_chunks(
    input: BoxStream<'static, Result<Bytes, String>>,
) -> BoxStream<'static, Result<Bytes, String>> {
    let mut events = sse_event_stream(input);
    let stream_id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = Utc::now().timestamp();

    Box::pin(async_stream::stream! {
        let mut model = String::new();
        let mut sent_role = false;
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
            let kind = event
                .event
                .clone()
                .or_else(|| payload.get("type").and_then(Value::as_str).map(String::from))
                .unwrap_or_default();

            match kind.as_str() {
                "response.created" => {
                    if let Some(m) = payload.pointer("/response/model").and_then(Value::as_str) {
                        model = m.to_string();
                    }
                }
                "response.output_text.delta" => {
                    let delta = payload.get("delta").and_then(Value::as_str).unwrap_or_default();
                    let mut delta_obj = json!({"content": delta});
                    if !sent_role {
                        delta_obj["role"] = json!("assistant");
                        sent_role = true;
                    }
                    let chunk = json!({
                        "id": &stream_id,
                        "object": "chat.completion.chunk",
                        "created": created,
                        "model": &model,
                        "choices": [{"index": 0, "delta": delta_obj, "finish_reason": Value::Null}],
                    });
                    yield Ok(sse_data_frame(&chunk.to_string()));
                }
                "response.completed" | "response.incomplete" => {
                    let finish = if kind == "response.incomplete" { "length" } else { "stop" };
                    let final_chunk = json!({
                        "id": &stream_id,
                        "object": "chat.completion.chunk",
                        "created": created,
                        "model": &model,
                        "choices": [{"index": 0, "delta": {}, "finish_reason": finish}],
                    });
                    yield Ok(sse_data_frame(&final_chunk.to_string()));

                    if let Some(u) = payload.pointer("/response/usage").and_then(Value::as_object) {
                        let input_tokens = u.get("input_tokens").cloned().unwrap_or(json!(0));
                        let output_tokens = u.get("output_tokens").cloned().unwrap_or(json!(0));
                        let total = u.get("total_tokens").cloned().unwrap_or(json!(
                            input_tokens.as_i64().unwrap_or(0) + output_tokens.as_i64().unwrap_or(0)
                        ));
                        let usage_chunk = json!({
                            "id": &stream_id,
                            "object": "chat.completion.chunk",
                            "created": created,
                            "model": &model,
                            "choices": [],
                            "usage": {
                                "prompt_tokens": input_tokens,
                                "completion_tokens": output_tokens,
                                "total_tokens": total,
                            },
                        });
                        yield Ok(sse_data_frame(&usage_chunk.to_string()));
                    }
                }
                _ => {}
            }
        }
        yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_to_responses_moves_system_to_instructions() {
        let body = serde_json::to_vec(&json!({
            "model": "gpt-4o",
            "stream": true,
            "max_tokens": 128,
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
            ],
        }))
        .unwrap();
        let out: Value = serde_json::from_slice(&chat_to_responses(&body).unwrap()).unwrap();
        assert_eq!(out["model"], "gpt-4o");
        assert_eq!(out["instructions"], "be brief");
        assert_eq!(out["stream"], true);
        assert_eq!(out["max_output_tokens"], 128);
        assert_eq!(out["input"][0]["role"], "user");
        assert_eq!(out["input"][0]["content"][0]["type"], "input_text");
    }

    #[test]
    fn test_chat_to_responses_requires_model() {
        assert!(chat_to_responses(br#"{"messages":[]}"#).is_err());
        assert!(chat_to_responses(b"[]").is_err());
    }

    #[test]
    fn test_responses_to_chat_collects_output_text() {
        let body = serde_json::to_vec(&json!({
            "id": "resp_1",
            "model": "gpt-4o",
            "output": [
                {"type": "reasoning"},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "hello "},
                    {"type": "output_text", "text": "world"},
                ]},
            ],
            "usage": {"input_tokens": 3, "output_tokens": 5},
        }))
        .unwrap();
        let out: Value = serde_json::from_slice(&responses_to_chat(&body).unwrap()).unwrap();
        assert_eq!(out["object"], "chat.completion");
        assert_eq!(out["choices"][0]["message"]["content"], "hello world");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["prompt_tokens"], 3);
        assert_eq!(out["usage"]["total_tokens"], 8);
    }

    #[tokio::test]
    async fn test_sse_deltas_become_chat_chunks_in_order() {
        let upstream = concat!(
            "event: response.created\n",
            "data: {\"type\":\"response.created\",\"response\":{\"model\":\"gpt-4o\"}}\n\n",
            "event: response.output_text.delta\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"a\"}\n\n",
            "event: response.output_text.delta\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"b\"}\n\n",
            "event: response.completed\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"usage\":{\"input_tokens\":3,\"output_tokens\":5}}}\n\n",
        );
        let input: BoxStream<'static, Result<Bytes, String>> =
            Box::pin(futures::stream::iter(vec![Ok(Bytes::from(upstream))]));
        let chunks: Vec<Bytes> = responses_sse_to_chat_chunks(input)
            .map(|r| r.unwrap())
            .collect()
            .await;
        let text = chunks.iter().map(|b| String::from_utf8_lossy(b).into_owned()).collect::<String>();

        let a_at = text.find("\"content\":\"a\"").unwrap();
        let b_at = text.find("\"content\":\"b\"").unwrap();
        let stop_at = text.find("\"finish_reason\":\"stop\"").unwrap();
        let usage_at = text.find("\"total_tokens\":8").unwrap();
        let done_at = text.find("data: [DONE]").unwrap();
        assert!(a_at < b_at && b_at < stop_at && stop_at < usage_at && usage_at < done_at);
        assert!(text.contains("chat.completion.chunk"));
        assert!(text.contains("\"model\":\"gpt-4o\""));
    }
}
