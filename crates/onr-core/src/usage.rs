//! Token usage and finish-reason extraction.
//!
//! Streaming responses accumulate their decoded tail in a bounded ring
//! buffer; after EOF the tail is scanned for the last SSE event carrying a
//! usage object and the per-mode extractor reads token counts from it.
//! Unary responses feed the extractor directly.

use crate::dsl::{FinishReasonExtractConfig, UsageExtractConfig};
use crate::jsonutil;
use serde_json::Value;

/// Extracted token counts for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
    pub total_tokens: i64,
}

impl Usage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.total_tokens == 0
    }

    fn finalize(mut self) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self.input_tokens + self.output_tokens;
        }
        self
    }
}

/// Bounded ring buffer keeping the last `cap` bytes of a decoded stream.
#[derive(Debug)]
pub struct TailBuffer {
    buf: Vec<u8>,
    cap: usize,
}

pub const DEFAULT_TAIL_CAP: usize = 64 * 1024;

impl TailBuffer {
    pub fn new(cap: usize) -> Self {
        Self { buf: Vec::new(), cap: cap.max(1) }
    }

    pub fn write(&mut self, p: &[u8]) {
        if p.len() >= self.cap {
            self.buf.clear();
            self.buf.extend_from_slice(&p[p.len() - self.cap..]);
            return;
        }
        let overflow = (self.buf.len() + p.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend_from_slice(p);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for TailBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_CAP)
    }
}

/// Extract usage from a unary response body.
pub fn extract_usage(cfg: &UsageExtractConfig, body: &[u8]) -> Option<Usage> {
    let root: Value = serde_json::from_slice(body).ok()?;
    extract_usage_value(cfg, &root)
}

/// Extract usage from the tail of an SSE stream: the last `data:` event
/// carrying a usage object wins.
pub fn extract_usage_from_sse_tail(cfg: &UsageExtractConfig, tail: &[u8]) -> Option<Usage> {
    let mut last: Option<Usage> = None;
    for payload in sse_data_payloads(tail) {
        let Ok(root) = serde_json::from_str::<Value>(&payload) else {
            continue;
        };
        if !has_usage_object(&root) {
            continue;
        }
        if let Some(u) = extract_usage_value(cfg, &root) {
            if !u.is_empty() {
                last = Some(u);
            }
        }
    }
    last
}

fn has_usage_object(root: &Value) -> bool {
    root.get("usage").map(Value::is_object).unwrap_or(false)
        || root.get("usageMetadata").map(Value::is_object).unwrap_or(false)
        || root
            .pointer("/message/usage")
            .or_else(|| root.pointer("/delta/usage"))
            .map(Value::is_object)
            .unwrap_or(false)
}

/// JSON payloads of `data:` lines, `[DONE]` excluded.
fn sse_data_payloads(raw: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(raw);
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }
        out.push(payload.to_string());
    }
    out
}

fn extract_usage_value(cfg: &UsageExtractConfig, root: &Value) -> Option<Usage> {
    let mode = cfg.mode.trim().to_lowercase();
    let usage = match mode.as_str() {
        "" | "openai" => Usage {
            input_tokens: first_int(root, &["$.usage.prompt_tokens", "$.usage.input_tokens"]),
            output_tokens: first_int(
                root,
                &["$.usage.completion_tokens", "$.usage.output_tokens"],
            ),
            cache_read_tokens: jsonutil::get_int(
                root,
                "$.usage.prompt_tokens_details.cached_tokens",
            ),
            cache_write_tokens: 0,
            total_tokens: jsonutil::get_int(root, "$.usage.total_tokens"),
        },
        "anthropic" => {
            // streaming usage arrives under message_start/message_delta
            let scope = root
                .pointer("/message/usage")
                .or_else(|| root.pointer("/delta/usage"))
                .or_else(|| root.get("usage"))
                .cloned()
                .unwrap_or(Value::Null);
            let holder = serde_json::json!({ "usage": scope });
            Usage {
                input_tokens: jsonutil::get_int(&holder, "$.usage.input_tokens"),
                output_tokens: jsonutil::get_int(&holder, "$.usage.output_tokens"),
                cache_read_tokens: jsonutil::get_int(&holder, "$.usage.cache_read_input_tokens"),
                cache_write_tokens: jsonutil::get_int(
                    &holder,
                    "$.usage.cache_creation_input_tokens",
                ),
                total_tokens: 0,
            }
        }
        "gemini" => Usage {
            input_tokens: jsonutil::get_int(root, "$.usageMetadata.promptTokenCount"),
            output_tokens: jsonutil::get_int(root, "$.usageMetadata.candidatesTokenCount"),
            cache_read_tokens: jsonutil::get_int(root, "$.usageMetadata.cachedContentTokenCount"),
            cache_write_tokens: 0,
            total_tokens: jsonutil::get_int(root, "$.usageMetadata.totalTokenCount"),
        },
        "custom" => Usage {
            input_tokens: expr_or_path(root, &cfg.input_tokens_expr, &cfg.input_tokens_path),
            output_tokens: expr_or_path(root, &cfg.output_tokens_expr, &cfg.output_tokens_path),
            cache_read_tokens: expr_or_path(
                root,
                &cfg.cache_read_tokens_expr,
                &cfg.cache_read_tokens_path,
            ),
            cache_write_tokens: expr_or_path(
                root,
                &cfg.cache_write_tokens_expr,
                &cfg.cache_write_tokens_path,
            ),
            total_tokens: cfg
                .total_tokens_expr
                .as_ref()
                .map(|e| e.eval(root) as i64)
                .unwrap_or(0),
        },
        _ => return None,
    };
    Some(usage.finalize())
}

fn first_int(root: &Value, paths: &[&str]) -> i64 {
    for p in paths {
        let v = jsonutil::get_int(root, p);
        if v != 0 {
            return v;
        }
    }
    0
}

fn expr_or_path(
    root: &Value,
    expr: &Option<crate::expr::BalanceExpr>,
    path: &str,
) -> i64 {
    if let Some(e) = expr {
        return e.eval(root) as i64;
    }
    let p = path.trim();
    if p.is_empty() {
        return 0;
    }
    jsonutil::get_int(root, p)
}

/// Extract the finish reason from a unary body or an SSE tail.
pub fn extract_finish_reason(cfg: &FinishReasonExtractConfig, raw: &[u8], is_sse: bool) -> String {
    if is_sse {
        let mut last = String::new();
        for payload in sse_data_payloads(raw) {
            if let Ok(root) = serde_json::from_str::<Value>(&payload) {
                let v = finish_reason_value(cfg, &root);
                if !v.is_empty() {
                    last = v;
                }
            }
        }
        return last;
    }
    serde_json::from_slice::<Value>(raw)
        .map(|root| finish_reason_value(cfg, &root))
        .unwrap_or_default()
}

fn finish_reason_value(cfg: &FinishReasonExtractConfig, root: &Value) -> String {
    let mode = cfg.mode.trim().to_lowercase();
    match mode.as_str() {
        "" | "openai" => jsonutil::get_string(root, "$.choices[*].finish_reason"),
        "anthropic" => {
            let v = jsonutil::get_string(root, "$.delta.stop_reason");
            if v.is_empty() {
                jsonutil::get_string(root, "$.stop_reason")
            } else {
                v
            }
        }
        "gemini" => jsonutil::get_string(root, "$.candidates[*].finishReason"),
        "custom" => jsonutil::get_string(root, cfg.finish_reason_path.trim()),
        _ => String::new(),
    }
}

/// Stream pacing metrics: `ttft_ms` and output tokens per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamMetrics {
    pub ttft_ms: i64,
    pub tps: f64,
}

/// `tps = output_tokens / max(1ms, last_byte - first_byte)`, 0 when no
/// output tokens were reported.
pub fn stream_metrics(
    start: std::time::Instant,
    first_byte_at: Option<std::time::Instant>,
    last_byte_at: Option<std::time::Instant>,
    output_tokens: i64,
) -> StreamMetrics {
    let Some(first) = first_byte_at else {
        return StreamMetrics::default();
    };
    let ttft_ms = first.duration_since(start).as_millis() as i64;
    if output_tokens <= 0 {
        return StreamMetrics { ttft_ms, tps: 0.0 };
    }
    let last = last_byte_at.unwrap_or(first);
    let span_ms = last.duration_since(first).as_millis().max(1) as f64;
    StreamMetrics { ttft_ms, tps: output_tokens as f64 * 1000.0 / span_ms }
}

/// Rough token estimation from byte length, used when the provider reports
/// no usage. `chars_per_token` defaults to 4.
pub fn estimate_tokens(byte_len: usize, chars_per_token: f64) -> i64 {
    let ratio = if chars_per_token > 0.0 { chars_per_token } else { 4.0 };
    ((byte_len as f64) / ratio).ceil() as i64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn openai_cfg() -> UsageExtractConfig {
        UsageExtractConfig { mode: "openai".to_string(), ..UsageExtractConfig::default() }
    }

    #[test]
    fn test_openai_unary_usage() {
        let body = br#"{"usage":{"prompt_tokens":3,"completion_tokens":5,"total_tokens":8}}"#;
        let u = extract_usage(&openai_cfg(), body).unwrap();
        assert_eq!(u.input_tokens, 3);
        assert_eq!(u.output_tokens, 5);
        assert_eq!(u.total_tokens, 8);
    }

    #[test]
    fn test_openai_responses_style_field_names() {
        let body = br#"{"usage":{"input_tokens":7,"output_tokens":2}}"#;
        let u = extract_usage(&openai_cfg(), body).unwrap();
        assert_eq!(u.input_tokens, 7);
        assert_eq!(u.output_tokens, 2);
        assert_eq!(u.total_tokens, 9);
    }

    #[test]
    fn test_anthropic_message_delta_usage_in_tail() {
        let cfg = UsageExtractConfig { mode: "anthropic".to_string(), ..Default::default() };
        let tail = concat!(
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":10,\"output_tokens\":1}}}\n\n",
            "data: {\"type\":\"content_block_delta\"}\n\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\",\"usage\":{\"output_tokens\":42}},\"usage\":{\"output_tokens\":42}}\n\n",
            "data: [DONE]\n\n",
        );
        let u = extract_usage_from_sse_tail(&cfg, tail.as_bytes()).unwrap();
        assert_eq!(u.output_tokens, 42);
    }

    #[test]
    fn test_gemini_usage_metadata() {
        let cfg = UsageExtractConfig { mode: "gemini".to_string(), ..Default::default() };
        let body = br#"{"usageMetadata":{"promptTokenCount":11,"candidatesTokenCount":4,"totalTokenCount":15}}"#;
        let u = extract_usage(&cfg, body).unwrap();
        assert_eq!(u.input_tokens, 11);
        assert_eq!(u.output_tokens, 4);
        assert_eq!(u.total_tokens, 15);
    }

    #[test]
    fn test_custom_mode_with_expr() {
        let cfg = UsageExtractConfig {
            mode: "custom".to_string(),
            input_tokens_expr: Some(crate::expr::BalanceExpr::parse("$.u.a + $.u.b").unwrap()),
            output_tokens_path: "$.u.out".to_string(),
            ..Default::default()
        };
        let body = br#"{"u":{"a":2,"b":3,"out":7}}"#;
        let u = extract_usage(&cfg, body).unwrap();
        assert_eq!(u.input_tokens, 5);
        assert_eq!(u.output_tokens, 7);
    }

    #[test]
    fn test_sse_tail_last_usage_event_wins() {
        let tail = concat!(
            "data: {\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1}}\n\n",
            "data: {\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":5,\"total_tokens\":8}}\n\n",
        );
        let u = extract_usage_from_sse_tail(&openai_cfg(), tail.as_bytes()).unwrap();
        assert_eq!(u.total_tokens, 8);
    }

    #[test]
    fn test_tail_buffer_keeps_last_bytes() {
        let mut t = TailBuffer::new(8);
        t.write(b"0123456789");
        assert_eq!(t.bytes(), b"23456789");
        t.write(b"ab");
        assert_eq!(t.bytes(), b"456789ab");
    }

    #[test]
    fn test_finish_reason_modes() {
        let openai = FinishReasonExtractConfig { mode: "openai".to_string(), ..Default::default() };
        let body = br#"{"choices":[{"finish_reason":"stop"}]}"#;
        assert_eq!(extract_finish_reason(&openai, body, false), "stop");

        let gemini = FinishReasonExtractConfig { mode: "gemini".to_string(), ..Default::default() };
        let body = br#"{"candidates":[{"finishReason":"STOP"}]}"#;
        assert_eq!(extract_finish_reason(&gemini, body, false), "STOP");

        let custom = FinishReasonExtractConfig {
            mode: "custom".to_string(),
            finish_reason_path: "$.done.why".to_string(),
        };
        let body = br#"{"done":{"why":"length"}}"#;
        assert_eq!(extract_finish_reason(&custom, body, false), "length");
    }

    #[test]
    fn test_stream_metrics() {
        let start = std::time::Instant::now();
        let first = start + std::time::Duration::from_millis(120);
        let last = first + std::time::Duration::from_millis(880);
        let m = stream_metrics(start, Some(first), Some(last), 88);
        assert_eq!(m.ttft_ms, 120);
        assert!((m.tps - 100.0).abs() < 0.5);

        let none = stream_metrics(start, Some(first), Some(last), 0);
        assert_eq!(none.tps, 0.0);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(400, 4.0), 100);
        assert_eq!(estimate_tokens(10, 0.0), 3);
    }
}
