//! Per-request result fields published by handlers and read by the
//! access-log wrapper after the response body completes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Typed result fields; `-` renders for anything left unset.
#[derive(Debug, Default, Clone)]
pub struct ResultFields {
    pub provider: String,
    pub provider_source: String,
    pub api: String,
    pub stream: Option<bool>,
    pub model: String,
    pub usage_stage: String,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cache_read_tokens: Option<i64>,
    pub cache_write_tokens: Option<i64>,
    pub cost_total: Option<f64>,
    pub cost_input: Option<f64>,
    pub cost_output: Option<f64>,
    pub cost_cache_read: Option<f64>,
    pub cost_cache_write: Option<f64>,
    pub billable_input_tokens: Option<i64>,
    pub cost_multiplier: Option<f64>,
    pub cost_model: String,
    pub cost_channel: String,
    pub cost_unit: String,
    pub upstream_status: Option<u16>,
    pub finish_reason: String,
    pub ttft_ms: Option<i64>,
    pub tps: Option<f64>,
    pub appname: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResultContext(Arc<Mutex<ResultFields>>);

impl ResultContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, f: impl FnOnce(&mut ResultFields)) {
        if let Ok(mut guard) = self.0.lock() {
            f(&mut guard);
        }
    }

    pub fn snapshot(&self) -> ResultFields {
        self.0.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Flatten into the string map the access-log formatter consumes.
    pub fn to_log_fields(&self) -> HashMap<String, String> {
        let f = self.snapshot();
        let mut out = HashMap::new();
        let mut put = |k: &str, v: String| {
            if !v.trim().is_empty() {
                out.insert(k.to_string(), v);
            }
        };
        put("provider", f.provider);
        put("provider_source", f.provider_source);
        put("api", f.api);
        if let Some(s) = f.stream {
            put("stream", s.to_string());
        }
        put("model", f.model);
        put("usage_stage", f.usage_stage);
        let mut put_i64 = |k: &str, v: Option<i64>| {
            if let Some(n) = v {
                out.insert(k.to_string(), n.to_string());
            }
        };
        put_i64("input_tokens", f.input_tokens);
        put_i64("output_tokens", f.output_tokens);
        put_i64("total_tokens", f.total_tokens);
        put_i64("cache_read_tokens", f.cache_read_tokens);
        put_i64("cache_write_tokens", f.cache_write_tokens);
        put_i64("billable_input_tokens", f.billable_input_tokens);
        put_i64("ttft_ms", f.ttft_ms);
        let mut put_f64 = |k: &str, v: Option<f64>| {
            if let Some(n) = v {
                out.insert(k.to_string(), format!("{n:.6}"));
            }
        };
        put_f64("cost_total", f.cost_total);
        put_f64("cost_input", f.cost_input);
        put_f64("cost_output", f.cost_output);
        put_f64("cost_cache_read", f.cost_cache_read);
        put_f64("cost_cache_write", f.cost_cache_write);
        put_f64("cost_multiplier", f.cost_multiplier);
        if let Some(tps) = f.tps {
            out.insert("tps".to_string(), format!("{tps:.2}"));
        }
        if let Some(status) = f.upstream_status {
            out.insert("upstream_status".to_string(), status.to_string());
        }
        if !f.cost_model.trim().is_empty() {
            out.insert("cost_model".to_string(), f.cost_model);
        }
        if !f.cost_channel.trim().is_empty() {
            out.insert("cost_channel".to_string(), f.cost_channel);
        }
        if !f.cost_unit.trim().is_empty() {
            out.insert("cost_unit".to_string(), f.cost_unit);
        }
        if !f.finish_reason.trim().is_empty() {
            out.insert("finish_reason".to_string(), f.finish_reason);
        }
        if !f.appname.trim().is_empty() {
            out.insert("appname".to_string(), f.appname);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_flatten_and_skip_unset() {
        let ctx = ResultContext::new();
        ctx.update(|f| {
            f.provider = "openai".to_string();
            f.model = "gpt-4o-mini".to_string();
            f.input_tokens = Some(3);
            f.output_tokens = Some(5);
            f.total_tokens = Some(8);
            f.stream = Some(false);
            f.upstream_status = Some(200);
        });
        let fields = ctx.to_log_fields();
        assert_eq!(fields.get("provider").unwrap(), "openai");
        assert_eq!(fields.get("total_tokens").unwrap(), "8");
        assert_eq!(fields.get("stream").unwrap(), "false");
        assert_eq!(fields.get("upstream_status").unwrap(), "200");
        assert!(!fields.contains_key("cost_total"));
        assert!(!fields.contains_key("finish_reason"));
    }
}
