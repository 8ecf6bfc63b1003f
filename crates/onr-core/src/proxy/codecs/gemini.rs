//! OpenAI chat completions <-> Gemini generateContent mapping.

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

fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn map_gemini_finish_reason(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        _ => "stop",
    }
}

fn map_finish_to_gemini(finish: &str) -> &'static str {
    match finish {
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        _ => "STOP",
    }
}

/// `openai_chat_to_gemini_generate_content`: chat request -> generateContent
/// request.
pub fn chat_to_generate_content(body: &[u8]) -> Result<Vec<u8>, String> {
    let root = parse_object(body, "chat request")?;

    let mut contents = Vec::new();
    let mut system_parts = Vec::new();
    if let Some(messages) = root.get("messages").and_then(Value::as_array) {
        for msg in messages {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or_default();
            let text = content_text(msg.get("content").unwrap_or(&Value::Null));
            match role {
                "system" | "developer" => {
                    if !text.is_empty() {
                        system_parts.push(json!({"text": text}));
                    }
                }
                "assistant" => contents.push(json!({
                    "role": "model",
                    "parts": [{"text": text}],
                })),
                _ => contents.push(json!({
                    "role": "user",
                    "parts": [{"text": text}],
                })),
            }
        }
    }

    let mut out = Map::new();
    out.insert("contents".to_string(), Value::Array(contents));
    if !system_parts.is_empty() {
        out.insert("systemInstruction".to_string(), json!({"parts": system_parts}));
    }

    let mut generation_config = Map::new();
    if let Some(v) = root
        .get("max_tokens")
        .or_else(|| root.get("max_completion_tokens"))
        .and_then(Value::as_i64)
    {
        generation_config.insert("maxOutputTokens".to_string(), json!(v));
    }
    if let Some(v) = root.get("temperature") {
        generation_config.insert("temperature".to_string(), v.clone());
    }
    if let Some(v) = root.get("top_p") {
        generation_config.insert("topP".to_string(), v.clone());
    }
    if let Some(Value::Array(stops)) = root.get("stop") {
        generation_config.insert("stopSequences".to_string(), json!(stops));
    }
    if !generation_config.is_empty() {
        out.insert("generationConfig".to_string(), Value::Object(generation_config));
    }
    serde_json::to_vec(&out).map_err(|e| e.to_string())
}

/// `gemini_to_openai_chat`: generateContent request -> chat request.
pub fn generate_content_to_chat(body: &[u8]) -> Result<Vec<u8>, String> {
    let root = parse_object(body, "generateContent request")?;

    let mut messages = Vec::new();
    if let Some(system) = root.get("systemInstruction") {
        let text = content_text(system.get("parts").unwrap_or(&Value::Null));
        if !text.is_empty() {
            messages.push(json!({"role": "system", "content": text}));
        }
    }
    if let Some(contents) = root.get("contents").and_then(Value::as_array) {
        for c in contents {
            let role = match c.get("role").and_then(Value::as_str) {
                Some("model") => "assistant",
                _ => "user",
            };
            let text = content_text(c.get("parts").unwrap_or(&Value::Null));
            messages.push(json!({"role": role, "content": text}));
        }
    }

    let mut out = Map::new();
    // model rides on the URL in the Gemini API; the executor fills it in
    // from meta when present
    if let Some(m) = root.get("model") {
        out.insert("model".to_string(), m.clone());
    }
    out.insert("messages".to_string(), Value::Array(messages));
    if let Some(v) = root.get("generationConfig").and_then(|v| v.get("maxOutputTokens")) {
        out.insert("max_tokens".to_string(), v.clone());
    }
    if let Some(v) = root.get("generationConfig").and_then(|v| v.get("temperature")) {
        out.insert("temperature".to_string(), v.clone());
    }
    if let Some(v) = root.get("generationConfig").and_then(|v| v.get("topP")) {
        out.insert("top_p".to_string(), v.clone());
    }
    serde_json::to_vec(&out).map_err(|e| e.to_string())
}

/// `gemini_to_openai_chat` (response direction): generateContent response ->
/// chat response.
pub fn generate_content_response_to_chat(body: &[u8]) -> Result<Vec<u8>, String> {
    let root = parse_object(body, "generateContent response")?;

    let mut choices = Vec::new();
    if let Some(candidates) = root.get("candidates").and_then(Value::as_array) {
        for (idx, candidate) in candidates.iter().enumerate() {
            let text = content_text(candidate.pointer("/content/parts").unwrap_or(&Value::Null));
            let finish = candidate
                .get("finishReason")
                .and_then(Value::as_str)
                .map(map_gemini_finish_reason)
                .unwrap_or("stop");
            choices.push(json!({
                "index": idx,
                "message": {"role": "assistant", "content": text},
                "finish_reason": finish,
            }));
        }
    }
    if choices.is_empty() {
        return Err("candidates is required".to_string());
    }

    let input = root
        .get("usageMetadata")
        .and_then(|v| v.get("promptTokenCount"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let output = root
        .get("usageMetadata")
        .and_then(|v| v.get("candidatesTokenCount"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let total = root
        .get("usageMetadata")
        .and_then(|v| v.get("totalTokenCount"))
        .and_then(Value::as_i64)
        .unwrap_or(input + output);

    let out = json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": root.get("modelVersion").cloned().unwrap_or(json!("")),
        "choices": choices,
        "usage": {
            "prompt_tokens": input,
            "completion_tokens": output,
            "total_tokens": total,
        },
    });
    serde_json::to_vec(&out).map_err(|e| e.to_string())
}

/// `openai_to_gemini_generate_content`: chat response -> generateContent
/// response.
pub fn chat_response_to_generate_content(body: &[u8]) -> Result<Vec<u8>, String> {
    let root = parse_object(body, "chat response")?;
    let choices = root.get("choices").and_then(Value::as_array);
    let Some(choice0) = choices.and_then(|c| c.first()) else {
        return Err("choices is required".to_string());
    };
    let text = choice0
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let finish = choice0.get("finish_reason").and_then(Value::as_str).unwrap_or_default();

    let mut out = json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": map_finish_to_gemini(finish),
            "index": 0,
        }],
    });
    if let Some(u) = root.get("usage").and_then(Value::as_object) {
        let input = u.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0);
        let output = u.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0);
        let total = u.get("total_tokens").and_then(Value::as_i64).unwrap_or(input + output);
        out["usageMetadata"] = json!({
            "promptTokenCount": input,
            "candidatesTokenCount": output,
            "totalTokenCount": total,
        });
    }
    serde_json::to_vec(&out).map_err(|e| e.to_string())
}

/// `gemini_to_openai_chat_chunks`: streamGenerateContent SSE -> chat chunk
/// SSE.
pub fn generate_content_sse_to_chat_chunks(
    input: BoxStream<'static, Result<Bytes, String>>,
) -> BoxStream<'static, Result<Bytes, String>> {
    let mut events = sse_event_stream(input);
    let stream_id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = Utc::now().timestamp();

    Box::pin(async_stream::stream! {
        let mut final_usage: Option<Value> = None;
        let mut model = String::new();
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
            if let Some(m) = payload.get("modelVersion").and_then(Value::as_str) {
                model = m.to_string();
            }
            if let Some(u) = payload.get("usageMetadata").filter(|u| u.is_object()) {
                let input_tokens = u.get("promptTokenCount").and_then(Value::as_i64).unwrap_or(0);
                let output_tokens =
                    u.get("candidatesTokenCount").and_then(Value::as_i64).unwrap_or(0);
                let total = u
                    .get("totalTokenCount")
                    .and_then(Value::as_i64)
                    .unwrap_or(input_tokens + output_tokens);
                final_usage = Some(json!({
                    "prompt_tokens": input_tokens,
                    "completion_tokens": output_tokens,
                    "total_tokens": total,
                }));
            }
            let Some(candidates) = payload.get("candidates").and_then(Value::as_array) else {
                continue;
            };
            for (idx, candidate) in candidates.iter().enumerate() {
                let text = content_text(candidate.pointer("/content/parts").unwrap_or(&Value::Null));
                let finish = candidate
                    .get("finishReason")
                    .and_then(Value::as_str)
                    .map(map_gemini_finish_reason);
                if text.is_empty() && finish.is_none() {
                    continue;
                }
                let chunk = json!({
                    "id": &stream_id,
                    "object": "chat.completion.chunk",
                    "created": created,
                    "model": &model,
                    "choices": [{
                        "index": idx,
                        "delta": {"content": text},
                        "finish_reason": finish,
                    }],
                });
                yield Ok(sse_data_frame(&chunk.to_string()));
            }
        }
        if let Some(usage) = final_usage {
            let usage_chunk = json!({
                "id": &stream_id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": &model,
                "choices": [],
                "usage": usage,
            });
            yield Ok(sse_data_frame(&usage_chunk.to_string()));
        }
        yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
    })
}

/// `openai_to_gemini_chunks`: chat chunk SSE -> streamGenerateContent SSE.
pub fn chat_chunks_sse_to_generate_content(
    input: BoxStream<'static, Result<Bytes, String>>,
) -> BoxStream<'static, Result<Bytes, String>> {
    let mut events = sse_event_stream(input);

    Box::pin(async_stream::stream! {
        let mut usage: Option<Value> = None;
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
            if let Some(u) = payload.get("usage").and_then(Value::as_object) {
                let input_tokens = u.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0);
                let output_tokens =
                    u.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0);
                usage = Some(json!({
                    "promptTokenCount": input_tokens,
                    "candidatesTokenCount": output_tokens,
                    "totalTokenCount": u
                        .get("total_tokens")
                        .and_then(Value::as_i64)
                        .unwrap_or(input_tokens + output_tokens),
                }));
            }
            let Some(choice0) =
                payload.get("choices").and_then(Value::as_array).and_then(|c| c.first())
            else {
                continue;
            };
            let text = choice0
                .pointer("/delta/content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let finish = choice0
                .get("finish_reason")
                .and_then(Value::as_str)
                .filter(|f| !f.is_empty());
            if text.is_empty() && finish.is_none() {
                continue;
            }
            let mut frame = json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": text}]},
                    "index": 0,
                }],
            });
            if let Some(f) = finish {
                frame["candidates"][0]["finishReason"] = json!(map_finish_to_gemini(f));
                if let Some(u) = &usage {
                    frame["usageMetadata"] = u.clone();
                }
            }
            yield Ok(sse_data_frame(&frame.to_string()));
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_to_generate_content_roles_and_config() {
        let body = serde_json::to_vec(&json!({
            "model": "gemini-pro",
            "max_tokens": 64,
            "temperature": 0.5,
            "messages": [
                {"role": "system", "content": "short answers"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ],
        }))
        .unwrap();
        let out: Value = serde_json::from_slice(&chat_to_generate_content(&body).unwrap()).unwrap();
        assert_eq!(out["systemInstruction"]["parts"][0]["text"], "short answers");
        assert_eq!(out["contents"][0]["role"], "user");
        assert_eq!(out["contents"][1]["role"], "model");
        assert_eq!(out["generationConfig"]["maxOutputTokens"], 64);
        assert_eq!(out["generationConfig"]["temperature"], 0.5);
    }

    #[test]
    fn test_generate_content_to_chat_request() {
        let body = serde_json::to_vec(&json!({
            "systemInstruction": {"parts": [{"text": "sys"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "q"}]},
                {"role": "model", "parts": [{"text": "a"}]},
            ],
            "generationConfig": {"maxOutputTokens": 99},
        }))
        .unwrap();
        let out: Value = serde_json::from_slice(&generate_content_to_chat(&body).unwrap()).unwrap();
        assert_eq!(out["messages"][0]["role"], "system");
        assert_eq!(out["messages"][1]["content"], "q");
        assert_eq!(out["messages"][2]["role"], "assistant");
        assert_eq!(out["max_tokens"], 99);
    }

    #[test]
    fn test_generate_content_response_to_chat() {
        let body = serde_json::to_vec(&json!({
            "candidates": [{
                "content": {"parts": [{"text": "answer"}], "role": "model"},
                "finishReason": "MAX_TOKENS",
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3, "totalTokenCount": 10},
        }))
        .unwrap();
        let out: Value =
            serde_json::from_slice(&generate_content_response_to_chat(&body).unwrap()).unwrap();
        assert_eq!(out["choices"][0]["message"]["content"], "answer");
        assert_eq!(out["choices"][0]["finish_reason"], "length");
        assert_eq!(out["usage"]["total_tokens"], 10);
        assert!(generate_content_response_to_chat(br#"{"candidates":[]}"#).is_err());
    }

    #[test]
    fn test_chat_response_to_generate_content() {
        let body = serde_json::to_vec(&json!({
            "choices": [{
                "message": {"role": "assistant", "content": "done"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 2, "completion_tokens": 1, "total_tokens": 3},
        }))
        .unwrap();
        let out: Value =
            serde_json::from_slice(&chat_response_to_generate_content(&body).unwrap()).unwrap();
        assert_eq!(out["candidates"][0]["content"]["parts"][0]["text"], "done");
        assert_eq!(out["candidates"][0]["finishReason"], "STOP");
        assert_eq!(out["usageMetadata"]["totalTokenCount"], 3);
    }

    #[tokio::test]
    async fn test_gemini_sse_to_chat_chunks_with_usage_tail() {
        let upstream = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"par\"}],\"role\":\"model\"}}],\"modelVersion\":\"gemini-pro\"}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"is\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":2}}\n\n",
        );
        let input: BoxStream<'static, Result<Bytes, String>> =
            Box::pin(futures::stream::iter(vec![Ok(Bytes::from(upstream))]));
        let text: String = generate_content_sse_to_chat_chunks(input)
            .map(|r| String::from_utf8_lossy(&r.unwrap()).into_owned())
            .collect()
            .await;
        assert!(text.contains("\"content\":\"par\""));
        assert!(text.contains("\"finish_reason\":\"stop\""));
        assert!(text.contains("\"total_tokens\":6"));
        assert!(text.trim_end().ends_with("data: [DONE]"));
    }

    #[tokio::test]
    async fn test_chat_chunks_to_gemini_frames() {
        let upstream = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"x\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1,\"total_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );
        let input: BoxStream<'static, Result<Bytes, String>> =
            Box::pin(futures::stream::iter(vec![Ok(Bytes::from(upstream))]));
        let text: String = chat_chunks_sse_to_generate_content(input)
            .map(|r| String::from_utf8_lossy(&r.unwrap()).into_owned())
            .collect()
            .await;
        assert!(text.contains("\"text\":\"x\""));
        assert!(text.contains("\"finishReason\":\"STOP\""));
        assert!(text.contains("\"totalTokenCount\":2"));
    }
}
