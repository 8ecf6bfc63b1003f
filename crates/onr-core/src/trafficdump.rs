//! Per-request traffic dump capture.
//!
//! A recorder bound to the request id collects five sections (`META`,
//! `ORIGIN REQUEST`, `UPSTREAM REQUEST`, `UPSTREAM RESPONSE`,
//! `PROXY RESPONSE`); body sections are size-capped with a
//! `...[truncated]` marker. On close the file is written atomically
//! (`<path>.tmp` then rename).

use std::collections::BTreeMap;
use std::path::PathBuf;

const TRUNCATED_MARK: &str = "...[truncated]";
const MASKED: &str = "***";

const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key", "x-goog-api-key"];
const SENSITIVE_QUERY_PARAMS: &[&str] = &["k", "k64", "uk", "key"];

#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub enabled: bool,
    pub dir: String,
    /// `{{.request_id}}` expands to the request id.
    pub file_path: String,
    pub max_bytes: usize,
    pub mask_secrets: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: "./dumps".to_string(),
            file_path: "{{.request_id}}.log".to_string(),
            max_bytes: 1024 * 1024,
            mask_secrets: true,
        }
    }
}

/// A size-capped append buffer. Records whether input was dropped.
#[derive(Debug, Default)]
pub struct LimitedBuffer {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl LimitedBuffer {
    pub fn new(limit: usize) -> Self {
        Self { buf: Vec::new(), limit, truncated: false }
    }

    pub fn write(&mut self, p: &[u8]) {
        if self.limit == 0 {
            return;
        }
        let room = self.limit.saturating_sub(self.buf.len());
        if room == 0 {
            self.truncated |= !p.is_empty();
            return;
        }
        if p.len() > room {
            self.buf.extend_from_slice(&p[..room]);
            self.truncated = true;
        } else {
            self.buf.extend_from_slice(p);
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[derive(Debug, Default)]
struct Section {
    head: String,
    body: Option<(Vec<u8>, bool)>,
}

/// Collects one request's dump sections and writes them on close.
pub struct Recorder {
    cfg: DumpConfig,
    request_id: String,
    meta: BTreeMap<String, String>,
    origin_request: Section,
    upstream_request: Section,
    upstream_response: Section,
    proxy_response: Section,
}

impl Recorder {
    /// Start a recorder for one request; `None` when dumping is disabled.
    pub fn start(cfg: &DumpConfig, request_id: &str) -> Option<Self> {
        if !cfg.enabled || request_id.trim().is_empty() {
            return None;
        }
        Some(Self {
            cfg: cfg.clone(),
            request_id: request_id.trim().to_string(),
            meta: BTreeMap::new(),
            origin_request: Section::default(),
            upstream_request: Section::default(),
            upstream_response: Section::default(),
            proxy_response: Section::default(),
        })
    }

    pub fn max_bytes(&self) -> usize {
        self.cfg.max_bytes
    }

    pub fn set_meta(&mut self, key: &str, value: &str) {
        if !value.trim().is_empty() {
            self.meta.insert(key.to_string(), value.to_string());
        }
    }

    pub fn record_origin_request(
        &mut self,
        method: &str,
        uri: &str,
        headers: &[(String, String)],
        body: &[u8],
        body_truncated: bool,
    ) {
        self.origin_request.head = self.format_request_head(method, uri, headers);
        self.origin_request.body = Some((self.cap_body(body), body_truncated));
    }

    pub fn record_upstream_request(
        &mut self,
        method: &str,
        uri: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) {
        self.upstream_request.head = self.format_request_head(method, uri, headers);
        self.upstream_request.body = Some((self.cap_body(body), false));
    }

    pub fn record_upstream_response(
        &mut self,
        status: u16,
        headers: &[(String, String)],
        body: &[u8],
        body_truncated: bool,
    ) {
        let mut head = format!("HTTP {status}\n");
        for (name, value) in headers {
            head.push_str(&format!("{name}: {}\n", self.mask_header(name, value)));
        }
        self.upstream_response.head = head;
        self.upstream_response.body = Some((self.cap_body(body), body_truncated));
    }

    pub fn record_proxy_response(&mut self, body: &[u8], body_truncated: bool) {
        self.proxy_response.body = Some((self.cap_body(body), body_truncated));
    }

    /// Render and atomically write the dump file.
    pub fn close(self) -> std::io::Result<PathBuf> {
        let rel = self.cfg.file_path.replace("{{.request_id}}", &self.request_id);
        let path = PathBuf::from(&self.cfg.dir).join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out = String::new();
        out.push_str("=== META ===\n");
        out.push_str(&format!("request_id: {}\n", self.request_id));
        for (k, v) in &self.meta {
            out.push_str(&format!("{k}: {v}\n"));
        }
        write_section(&mut out, "ORIGIN REQUEST", &self.origin_request);
        write_section(&mut out, "UPSTREAM REQUEST", &self.upstream_request);
        write_section(&mut out, "UPSTREAM RESPONSE", &self.upstream_response);
        write_section(&mut out, "PROXY RESPONSE", &self.proxy_response);

        let tmp = path.with_file_name(format!(
            "{}.tmp",
            path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
        ));
        std::fs::write(&tmp, out.as_bytes())?;
        match std::fs::rename(&tmp, &path) {
            Ok(()) => Ok(path),
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                Err(e)
            }
        }
    }

    fn format_request_head(
        &self,
        method: &str,
        uri: &str,
        headers: &[(String, String)],
    ) -> String {
        let mut head = format!("{method} {}\n", self.mask_uri(uri));
        for (name, value) in headers {
            head.push_str(&format!("{name}: {}\n", self.mask_header(name, value)));
        }
        head
    }

    fn cap_body(&self, body: &[u8]) -> Vec<u8> {
        if self.cfg.max_bytes > 0 && body.len() > self.cfg.max_bytes {
            body[..self.cfg.max_bytes].to_vec()
        } else {
            body.to_vec()
        }
    }

    fn mask_header(&self, name: &str, value: &str) -> String {
        if self.cfg.mask_secrets && SENSITIVE_HEADERS.contains(&name.to_lowercase().as_str()) {
            MASKED.to_string()
        } else {
            value.to_string()
        }
    }

    fn mask_uri(&self, uri: &str) -> String {
        if !self.cfg.mask_secrets {
            return uri.to_string();
        }
        let Some((base, query)) = uri.split_once('?') else {
            return uri.to_string();
        };
        let masked: Vec<String> = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((k, _)) if SENSITIVE_QUERY_PARAMS.contains(&k.to_lowercase().as_str()) => {
                    format!("{k}={MASKED}")
                }
                _ => pair.to_string(),
            })
            .collect();
        format!("{base}?{}", masked.join("&"))
    }
}

fn write_section(out: &mut String, title: &str, section: &Section) {
    out.push_str(&format!("=== {title} ===\n"));
    if !section.head.is_empty() {
        out.push_str(&section.head);
    }
    if let Some((body, truncated)) = &section.body {
        out.push('\n');
        out.push_str(&String::from_utf8_lossy(body));
        if *truncated {
            out.push_str(TRUNCATED_MARK);
        }
        out.push('\n');
    }
}
