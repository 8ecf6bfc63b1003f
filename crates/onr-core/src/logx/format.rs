//! Access log format compiler.
//!
//! A format string contains `$var` placeholders (validated against an
//! allow-list) and `$$` for a literal dollar. Missing values render as `-`.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Var(String),
}

/// A compiled access log format.
#[derive(Debug, Clone)]
pub struct AccessLogFormatter {
    parts: Vec<Part>,
}

const PRESET_COMBINED: &str = "$time_local | $status | $latency | $client_ip | $method $path | request_id=$request_id appname=$appname provider=$provider provider_source=$provider_source api=$api stream=$stream model=$model usage_stage=$usage_stage input_tokens=$input_tokens output_tokens=$output_tokens total_tokens=$total_tokens cache_read_tokens=$cache_read_tokens cache_write_tokens=$cache_write_tokens cost_total=$cost_total cost_input=$cost_input cost_output=$cost_output cost_cache_read=$cost_cache_read cost_cache_write=$cost_cache_write billable_input_tokens=$billable_input_tokens cost_multiplier=$cost_multiplier cost_model=$cost_model cost_channel=$cost_channel cost_unit=$cost_unit upstream_status=$upstream_status finish_reason=$finish_reason ttft_ms=$ttft_ms tps=$tps";
const PRESET_MINIMAL: &str = "$time_local | $status | $latency | $method $path | request_id=$request_id appname=$appname provider=$provider model=$model total_tokens=$total_tokens cost_total=$cost_total";

const ALLOWED_VARS: &[&str] = &[
    "time_local",
    "status",
    "latency",
    "latency_ms",
    "client_ip",
    "method",
    "path",
    "request_id",
    "appname",
    "provider",
    "provider_source",
    "api",
    "stream",
    "model",
    "usage_stage",
    "input_tokens",
    "output_tokens",
    "total_tokens",
    "cache_read_tokens",
    "cache_write_tokens",
    "cost_total",
    "cost_input",
    "cost_output",
    "cost_cache_read",
    "cost_cache_write",
    "billable_input_tokens",
    "cost_multiplier",
    "cost_model",
    "cost_channel",
    "cost_unit",
    "upstream_status",
    "finish_reason",
    "ttft_ms",
    "tps",
];

/// Resolution order: explicit format wins; else preset; else empty
/// (access log formatting disabled).
pub fn resolve_access_log_format(format: &str, preset: &str) -> Result<String, String> {
    if !format.trim().is_empty() {
        return Ok(format.to_string());
    }
    let p = preset.trim().to_lowercase();
    match p.as_str() {
        "" => Ok(String::new()),
        "onr_combined" => Ok(PRESET_COMBINED.to_string()),
        "onr_minimal" => Ok(PRESET_MINIMAL.to_string()),
        other => Err(format!("invalid access_log_format_preset: {other:?}")),
    }
}

impl AccessLogFormatter {
    /// Compile a format string. An empty format compiles to `None`.
    pub fn compile(format: &str) -> Result<Option<Self>, String> {
        if format.trim().is_empty() {
            return Ok(None);
        }
        let chars: Vec<char> = format.chars().collect();
        let mut parts = Vec::new();
        let mut lit = String::new();
        let mut i = 0;
        while i < chars.len() {
            let ch = chars[i];
            if ch != '$' {
                lit.push(ch);
                i += 1;
                continue;
            }
            if i + 1 < chars.len() && chars[i + 1] == '$' {
                lit.push('$');
                i += 2;
                continue;
            }
            if !lit.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut lit)));
            }
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            if j == i + 1 {
                return Err(format!(
                    "invalid access_log_format: missing variable name after '$' at pos {i}"
                ));
            }
            let name: String = chars[i + 1..j].iter().collect();
            if !ALLOWED_VARS.contains(&name.as_str()) {
                return Err(format!("invalid access_log_format: unknown variable ${name}"));
            }
            parts.push(Part::Var(name));
            i = j;
        }
        if !lit.is_empty() {
            parts.push(Part::Literal(lit));
        }
        Ok(Some(Self { parts }))
    }

    /// Render one access log line (no trailing newline).
    #[allow(clippy::too_many_arguments)]
    pub fn format(
        &self,
        ts: DateTime<Local>,
        status: u16,
        latency: Duration,
        client_ip: &str,
        method: &str,
        path: &str,
        fields: &HashMap<String, String>,
        color: bool,
    ) -> String {
        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert("time_local", ts.format("%Y/%m/%d - %H:%M:%S").to_string());
        vars.insert("status", colorize_status_with(status, color));
        vars.insert("latency", format_latency(latency));
        vars.insert("latency_ms", latency.as_millis().to_string());
        vars.insert("client_ip", client_ip.trim().to_string());
        vars.insert("method", method.trim().to_string());
        vars.insert("path", path.to_string());
        for (k, v) in fields {
            let s = v.trim();
            if s.is_empty() {
                continue;
            }
            vars.insert(k.as_str(), s.to_string());
        }

        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Var(name) => {
                    match vars.get(name.as_str()).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                        Some(v) => out.push_str(v),
                        None => out.push('-'),
                    }
                }
            }
        }
        out
    }
}

fn format_latency(latency: Duration) -> String {
    let ms = latency.as_secs_f64() * 1000.0;
    if ms >= 1000.0 {
        format!("{:.3}s", ms / 1000.0)
    } else {
        format!("{ms:.3}ms")
    }
}

/// Status colorization for console sinks; plain number otherwise.
pub fn colorize_status_with(status: u16, color: bool) -> String {
    if !color {
        return status.to_string();
    }
    let code = match status {
        200..=299 => "32",
        300..=399 => "36",
        400..=499 => "33",
        _ => "31",
    };
    format!("\x1b[{code}m{status}\x1b[0m")
}

/// Sorted list of allowed `$var` names, for admin affordances.
pub fn access_log_allowed_vars() -> Vec<&'static str> {
    let mut out: Vec<&'static str> = ALLOWED_VARS.to_vec();
    out.sort_unstable();
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 2, 1, 12, 30, 45).unwrap()
    }

    #[test]
    fn test_compile_rejects_unknown_var() {
        assert!(AccessLogFormatter::compile("$bogus").is_err());
        assert!(AccessLogFormatter::compile("$").is_err());
    }

    #[test]
    fn test_empty_format_disables() {
        assert!(AccessLogFormatter::compile("  ").unwrap().is_none());
    }

    #[test]
    fn test_dollar_escape_and_missing_values() {
        let f = AccessLogFormatter::compile("cost=$$$cost_total model=$model").unwrap().unwrap();
        let mut fields = HashMap::new();
        fields.insert("cost_total".to_string(), "0.12".to_string());
        let line = f.format(ts(), 200, Duration::from_millis(35), "1.2.3.4", "POST", "/v1/x", &fields, false);
        assert_eq!(line, "cost=$0.12 model=-");
    }

    #[test]
    fn test_preset_resolution_order() {
        assert_eq!(resolve_access_log_format("$status", "onr_minimal").unwrap(), "$status");
        assert!(resolve_access_log_format("", "onr_combined").unwrap().contains("$ttft_ms"));
        assert_eq!(resolve_access_log_format("", "").unwrap(), "");
        assert!(resolve_access_log_format("", "bogus").is_err());
    }

    #[test]
    fn test_format_line_fields() {
        let f = AccessLogFormatter::compile(
            "$time_local | $status | $method $path | provider=$provider",
        )
        .unwrap()
        .unwrap();
        let mut fields = HashMap::new();
        fields.insert("provider".to_string(), "openai".to_string());
        let line = f.format(ts(), 404, Duration::from_millis(5), "", "GET", "/v1/models", &fields, false);
        assert_eq!(line, "2026/02/01 - 12:30:45 | 404 | GET /v1/models | provider=openai");
    }

    #[test]
    fn test_colorize() {
        assert_eq!(colorize_status_with(200, false), "200");
        assert!(colorize_status_with(200, true).contains("32"));
        assert!(colorize_status_with(500, true).contains("31"));
    }
}
