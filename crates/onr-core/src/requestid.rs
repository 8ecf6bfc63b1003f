//! Request id generation and header key resolution.

use chrono::Local;
use rand::Rng;

pub const DEFAULT_HEADER_KEY: &str = "X-Onr-Request-Id";

/// The provided header key when non-empty, else the default.
pub fn resolve_header_key(header_key: &str) -> &str {
    let v = header_key.trim();
    if v.is_empty() {
        DEFAULT_HEADER_KEY
    } else {
        header_key
    }
}

/// Generate a 28-digit request id: `yyyymmddHHMMSSffffff` local time plus
/// 8 random digits.
pub fn gen() -> String {
    let ts = Local::now().format("%Y%m%d%H%M%S%6f").to_string();
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(ts.len() + 8);
    out.push_str(&ts);
    for _ in 0..8 {
        out.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    out
}
