//! Upstream error normalization (`error { error_map <mode>; }`).
//!
//! On a non-2xx upstream response, the body is re-emitted in the target
//! schema; the status code is always preserved.

use crate::jsonutil;
use serde_json::{json, Value};

const MAX_RAW_MESSAGE: usize = 512;

/// Normalize an upstream error body. Returns the new body plus a
/// content-type override (`None` leaves upstream headers alone).
pub fn normalize_error_body(
    mode: &str,
    status: u16,
    body: &[u8],
) -> (Vec<u8>, Option<&'static str>) {
    match mode.trim().to_lowercase().as_str() {
        "openai" => {
            let message = extract_message(body, status);
            let out = json!({
                "error": {
                    "message": message,
                    "type": "upstream_error",
                    "code": "upstream_error",
                }
            });
            (out.to_string().into_bytes(), Some("application/json"))
        }
        "common" => {
            let message = extract_message(body, status);
            let out = json!({ "code": status, "message": message });
            (out.to_string().into_bytes(), Some("application/json"))
        }
        _ => (body.to_vec(), None),
    }
}

/// Best-effort error message: known JSON shapes first, then the raw body,
/// then the bare status.
fn extract_message(body: &[u8], status: u16) -> String {
    if let Ok(root) = serde_json::from_slice::<Value>(body) {
        for path in ["$.error.message", "$.message", "$.error_msg", "$.detail"] {
            let m = jsonutil::get_string(&root, path);
            if !m.trim().is_empty() {
                return m;
            }
        }
        if let Some(s) = root.get("error").and_then(Value::as_str) {
            if !s.trim().is_empty() {
                return s.to_string();
            }
        }
    }
    let raw = String::from_utf8_lossy(body);
    let raw = raw.trim();
    if raw.is_empty() {
        return format!("upstream returned status {status}");
    }
    let mut msg = raw.to_string();
    if msg.len() > MAX_RAW_MESSAGE {
        msg.truncate(MAX_RAW_MESSAGE);
    }
    msg
}
