//! Semantic validation of parsed provider files.
//!
//! At boot the whole directory must validate (`validate_providers_dir`,
//! fail-closed); at reload invalid files are skipped and reported while the
//! previous snapshot stays in force (see `registry`).

use super::parse::{parse_provider, ParsedProvider};
use super::scanner::{preprocess_includes, Scanner, TokenKind};
use super::types::*;
use onr_types::ProviderError;
use std::path::Path;

const REQ_MAP_MODES: &[&str] = &[
    "openai_chat_to_openai_responses",
    "openai_chat_to_anthropic_messages",
    "openai_chat_to_gemini_generate_content",
    "anthropic_to_openai_chat",
    "gemini_to_openai_chat",
];

const RESP_MAP_MODES: &[&str] = &[
    "openai_responses_to_openai_chat",
    "anthropic_to_openai_chat",
    "gemini_to_openai_chat",
    "openai_to_anthropic_messages",
    "openai_to_gemini_chat",
    "openai_to_gemini_generate_content",
];

const SSE_PARSE_MODES: &[&str] = &[
    "openai_responses_to_openai_chat_chunks",
    "anthropic_to_openai_chunks",
    "openai_to_anthropic_chunks",
    "openai_to_gemini_chunks",
    "gemini_to_openai_chat_chunks",
];

const ERROR_MAP_MODES: &[&str] = &["openai", "common", "passthrough"];
const EXTRACT_MODES: &[&str] = &["openai", "anthropic", "gemini", "custom"];
const OAUTH_MODES: &[&str] =
    &["openai", "gemini", "qwen", "claude", "iflow", "antigravity", "kimi", "custom"];

/// A non-fatal validation diagnostic, used for migration hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub directive: String,
    pub message: String,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line > 0 && self.column > 0 {
            write!(f, "{}:{}:{}: {}", self.file, self.line, self.column, self.message)
        } else {
            write!(f, "{}: {}", self.file, self.message)
        }
    }
}

/// Validate a single provider config file: expand includes, parse, check the
/// declared name against the filename stem, and run semantic checks.
pub fn validate_provider_file(path: &str) -> Result<ProviderFile, ProviderError> {
    let p = path.trim();
    if p.is_empty() {
        return Err(ProviderError::Invalid {
            file: String::new(),
            message: "provider file path is empty".to_string(),
        });
    }
    if Path::new(p).extension().and_then(|e| e.to_str()) != Some("conf") {
        return Err(ProviderError::Invalid {
            file: p.to_string(),
            message: "provider file must have .conf extension".to_string(),
        });
    }
    let raw = std::fs::read_to_string(p).map_err(|e| ProviderError::Invalid {
        file: p.to_string(),
        message: format!("read provider file: {e}"),
    })?;
    let content = preprocess_includes(p, &raw)?;

    let parsed = parse_provider(p, &content)
        .map_err(|message| ProviderError::Parse { file: p.to_string(), message })?;

    let declared = normalize_provider_name(&parsed.name);
    let expected = normalize_provider_name(
        Path::new(p).file_stem().and_then(|s| s.to_str()).unwrap_or_default(),
    );
    if declared != expected {
        return Err(ProviderError::Invalid {
            file: p.to_string(),
            message: format!("declares provider {declared:?}, expected {expected:?}"),
        });
    }

    let base_url = validate_base_url(p, &declared, &parsed.routing.base_url)?;
    validate_parsed(p, &declared, &parsed)?;

    let ParsedProvider {
        routing, headers, request, response, error, usage, finish, balance, models, ..
    } = parsed;

    Ok(ProviderFile {
        name: declared,
        path: p.to_string(),
        content,
        routing: ProviderRouting { base_url, matches: routing.matches },
        headers,
        request,
        response,
        error,
        usage,
        finish,
        balance,
        models,
    })
}

/// Validate all `*.conf` files in a directory. Strict: any error fails the
/// whole validation; duplicate provider names fail the whole load.
pub fn validate_providers_dir(
    dir: &str,
) -> Result<(Vec<ProviderFile>, Vec<ValidationWarning>), ProviderError> {
    let d = dir.trim();
    if d.is_empty() {
        return Err(ProviderError::Invalid {
            file: String::new(),
            message: "providers dir is empty".to_string(),
        });
    }
    let entries = std::fs::read_dir(d).map_err(|e| ProviderError::Invalid {
        file: d.to_string(),
        message: format!("read providers dir: {e}"),
    })?;

    let mut paths: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ProviderError::Invalid {
            file: d.to_string(),
            message: format!("read providers dir entry: {e}"),
        })?;
        let path = entry.path();
        if path.is_dir() || path.extension().and_then(|e| e.to_str()) != Some("conf") {
            continue;
        }
        paths.push(path.to_string_lossy().into_owned());
    }
    paths.sort();

    let mut out = Vec::new();
    let mut warnings = Vec::new();
    let mut seen: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    for path in paths {
        let pf = validate_provider_file(&path)?;
        if let Some(prev) = seen.get(&pf.name) {
            return Err(ProviderError::Duplicate {
                name: pf.name,
                file: path,
                previous: prev.clone(),
            });
        }
        seen.insert(pf.name.clone(), path.clone());
        warnings.extend(collect_deprecated_directive_warnings(&path, &pf.content));
        out.push(pf);
    }
    warnings.sort_by(|a, b| {
        (&a.file, a.line, a.column, &a.directive).cmp(&(&b.file, b.line, b.column, &b.directive))
    });
    Ok((out, warnings))
}

fn invalid(file: &str, message: String) -> ProviderError {
    ProviderError::Invalid { file: file.to_string(), message }
}

/// base_url must be a quoted string literal parsing as an absolute URL.
/// Expression forms are rejected; returns the unquoted value.
fn validate_base_url(file: &str, provider: &str, raw: &str) -> Result<String, ProviderError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(invalid(
            file,
            format!("provider {provider:?}: upstream_config.base_url is required"),
        ));
    }
    if raw == "$channel.base_url" || !raw.starts_with('"') || !raw.ends_with('"') {
        return Err(invalid(
            file,
            format!(
                "provider {provider:?}: upstream_config.base_url must be a string literal, got {raw:?}"
            ),
        ));
    }
    let v = crate::expr::unquote(raw).trim().to_string();
    if v.is_empty() {
        return Err(invalid(
            file,
            format!("provider {provider:?}: upstream_config.base_url must be non-empty"),
        ));
    }
    match url::Url::parse(&v) {
        Ok(u) if !u.scheme().is_empty() && u.host_str().is_some() => Ok(v),
        _ => Err(invalid(
            file,
            format!(
                "provider {provider:?}: upstream_config.base_url must be an absolute URL, got {v:?}"
            ),
        )),
    }
}

fn validate_parsed(file: &str, provider: &str, p: &ParsedProvider) -> Result<(), ProviderError> {
    validate_phase_headers(file, provider, "defaults.auth", &p.headers.defaults)?;
    for (i, (_, h)) in p.headers.matches.iter().enumerate() {
        validate_phase_headers(file, provider, &format!("match[{i}].auth"), h)?;
    }

    validate_request_transform(file, provider, "defaults.request", &p.request.defaults)?;
    for (i, (_, t)) in p.request.matches.iter().enumerate() {
        validate_request_transform(file, provider, &format!("match[{i}].request"), t)?;
    }

    validate_response_directive(file, provider, "defaults.response", &p.response.defaults)?;
    for (i, (_, r)) in p.response.matches.iter().enumerate() {
        validate_response_directive(file, provider, &format!("match[{i}].response"), r)?;
    }

    validate_error_directive(file, provider, "defaults.error", &p.error.defaults)?;
    for (i, (_, e)) in p.error.matches.iter().enumerate() {
        validate_error_directive(file, provider, &format!("match[{i}].error"), e)?;
    }

    validate_usage_config(file, provider, "defaults.metrics", &p.usage.defaults)?;
    for (i, (_, u)) in p.usage.matches.iter().enumerate() {
        validate_usage_config(file, provider, &format!("match[{i}].metrics"), u)?;
    }

    validate_finish_config(file, provider, "defaults.metrics", &p.finish.defaults)?;
    for (i, (_, f)) in p.finish.matches.iter().enumerate() {
        validate_finish_config(file, provider, &format!("match[{i}].metrics"), f)?;
    }

    validate_balance_config(file, provider, "defaults.balance", &p.balance.defaults)?;
    for (i, (_, b)) in p.balance.matches.iter().enumerate() {
        validate_balance_config(file, provider, &format!("match[{i}].balance"), b)?;
    }

    validate_models_config(file, provider, "defaults.models", &p.models)
}

fn validate_phase_headers(
    file: &str,
    provider: &str,
    scope: &str,
    phase: &PhaseHeaders,
) -> Result<(), ProviderError> {
    validate_header_ops(file, provider, &format!("{scope}.headers"), &phase.request)?;
    validate_oauth(file, provider, &format!("{scope}.oauth"), &phase.oauth)
}

fn validate_header_ops(
    file: &str,
    provider: &str,
    scope: &str,
    headers: &[HeaderOp],
) -> Result<(), ProviderError> {
    for (i, op) in headers.iter().enumerate() {
        let name = match op {
            HeaderOp::Set { name, .. } | HeaderOp::Del { name } => name,
        };
        if name.trim().is_empty() {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope}[{i}] name is empty"),
            ));
        }
    }
    Ok(())
}

fn validate_oauth(
    file: &str,
    provider: &str,
    scope: &str,
    cfg: &OAuthDirective,
) -> Result<(), ProviderError> {
    let mode = cfg.mode.trim().to_lowercase();
    if mode.is_empty() {
        if cfg.is_empty() {
            return Ok(());
        }
        return Err(invalid(file, format!("provider {provider:?}: {scope} requires oauth_mode")));
    }
    if !OAUTH_MODES.contains(&mode.as_str()) {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} unsupported oauth_mode {:?}", cfg.mode),
        ));
    }
    let method = cfg.method.trim().to_uppercase();
    if !method.is_empty() && method != "GET" && method != "POST" {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} oauth_method must be GET or POST"),
        ));
    }
    let ct = cfg.content_type.trim().to_lowercase();
    if !ct.is_empty() && ct != "form" && ct != "json" {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} oauth_content_type must be form or json"),
        ));
    }
    if cfg.timeout_ms == Some(0) {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} oauth_timeout_ms must be > 0"),
        ));
    }
    if cfg.fallback_ttl_sec == Some(0) {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} oauth_fallback_ttl_sec must be > 0"),
        ));
    }
    if mode == "custom" {
        if cfg.token_url.is_none() {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope} oauth_token_url is required in custom mode"),
            ));
        }
        if cfg.form.is_empty() {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope} oauth_form is required in custom mode"),
            ));
        }
    }
    for (i, (key, _)) in cfg.form.iter().enumerate() {
        if key.trim().is_empty() {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope} oauth_form[{i}] key is empty"),
            ));
        }
    }
    for (name, val) in [
        ("oauth_token_path", &cfg.token_path),
        ("oauth_expires_in_path", &cfg.expires_in_path),
        ("oauth_token_type_path", &cfg.token_type_path),
    ] {
        let v = val.trim();
        if !v.is_empty() && !v.starts_with("$.") {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope} {name} must start with '$.'"),
            ));
        }
    }
    Ok(())
}

fn validate_request_transform(
    file: &str,
    provider: &str,
    scope: &str,
    t: &RequestTransform,
) -> Result<(), ProviderError> {
    let mode = t.req_map.trim().to_lowercase();
    if !mode.is_empty() && !REQ_MAP_MODES.contains(&mode.as_str()) {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} unsupported req_map mode {:?}", t.req_map),
        ));
    }
    validate_json_ops(file, provider, scope, &t.json_ops)
}

fn validate_json_ops(
    file: &str,
    provider: &str,
    scope: &str,
    ops: &[JsonOp],
) -> Result<(), ProviderError> {
    for (i, op) in ops.iter().enumerate() {
        let check = |path: &str, what: &str| -> Result<(), ProviderError> {
            crate::jsonutil::parse_path(path).map(|_| ()).map_err(|e| {
                invalid(
                    file,
                    format!("provider {provider:?}: {scope}.json_op[{i}] invalid {what}: {e}"),
                )
            })
        };
        match op {
            JsonOp::Set { path, .. } | JsonOp::SetIfAbsent { path, .. } | JsonOp::Del { path } => {
                check(path, "json path")?;
            }
            JsonOp::Rename { from, to } => {
                check(from, "from path")?;
                check(to, "to path")?;
            }
        }
    }
    Ok(())
}

fn validate_response_directive(
    file: &str,
    provider: &str,
    scope: &str,
    d: &ResponseDirective,
) -> Result<(), ProviderError> {
    match &d.op {
        ResponseOp::Unset | ResponseOp::Passthrough => {}
        ResponseOp::RespMap(mode) => {
            if !RESP_MAP_MODES.contains(&mode.trim().to_lowercase().as_str()) {
                return Err(invalid(
                    file,
                    format!("provider {provider:?}: {scope} unsupported resp_map mode {mode:?}"),
                ));
            }
        }
        ResponseOp::SseParse(mode) => {
            if !SSE_PARSE_MODES.contains(&mode.trim().to_lowercase().as_str()) {
                return Err(invalid(
                    file,
                    format!("provider {provider:?}: {scope} unsupported sse_parse mode {mode:?}"),
                ));
            }
        }
    }
    for (i, r) in d.sse_del_if.iter().enumerate() {
        if r.equals.trim().is_empty() {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope}.sse_json_del_if[{i}] equals must be non-empty"),
            ));
        }
        for (what, path) in [("cond path", &r.cond_path), ("del path", &r.del_path)] {
            crate::jsonutil::parse_path(path).map_err(|e| {
                invalid(
                    file,
                    format!(
                        "provider {provider:?}: {scope}.sse_json_del_if[{i}] invalid {what}: {e}"
                    ),
                )
            })?;
        }
    }
    validate_json_ops(file, provider, scope, &d.json_ops)
}

fn validate_error_directive(
    file: &str,
    provider: &str,
    scope: &str,
    e: &ErrorDirective,
) -> Result<(), ProviderError> {
    let mode = e.mode.trim().to_lowercase();
    if !mode.is_empty() && !ERROR_MAP_MODES.contains(&mode.as_str()) {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} unsupported error_map mode {:?}", e.mode),
        ));
    }
    Ok(())
}

fn validate_usage_config(
    file: &str,
    provider: &str,
    scope: &str,
    cfg: &UsageExtractConfig,
) -> Result<(), ProviderError> {
    let mode = cfg.mode.trim().to_lowercase();
    if mode.is_empty() {
        return Ok(());
    }
    if !EXTRACT_MODES.contains(&mode.as_str()) {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} unsupported usage_extract mode {:?}", cfg.mode),
        ));
    }
    if mode != "custom" {
        return Ok(());
    }
    if cfg.input_tokens_expr.is_none() && cfg.input_tokens_path.trim().is_empty() {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} requires input_tokens (expr) or input_tokens_path"),
        ));
    }
    if cfg.output_tokens_expr.is_none() && cfg.output_tokens_path.trim().is_empty() {
        return Err(invalid(
            file,
            format!(
                "provider {provider:?}: {scope} requires output_tokens (expr) or output_tokens_path"
            ),
        ));
    }
    for (name, val) in [
        ("input_tokens_path", &cfg.input_tokens_path),
        ("output_tokens_path", &cfg.output_tokens_path),
        ("cache_read_tokens_path", &cfg.cache_read_tokens_path),
        ("cache_write_tokens_path", &cfg.cache_write_tokens_path),
    ] {
        let v = val.trim();
        if !v.is_empty() && !v.starts_with("$.") {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope} {name} must start with '$.'"),
            ));
        }
    }
    Ok(())
}

fn validate_finish_config(
    file: &str,
    provider: &str,
    scope: &str,
    cfg: &FinishReasonExtractConfig,
) -> Result<(), ProviderError> {
    let mode = cfg.mode.trim().to_lowercase();
    let p = cfg.finish_reason_path.trim();
    if mode.is_empty() && p.is_empty() {
        return Ok(());
    }
    match mode.as_str() {
        "" | "openai" | "anthropic" | "gemini" => {}
        "custom" => {
            if p.is_empty() {
                return Err(invalid(
                    file,
                    format!(
                        "provider {provider:?}: {scope} finish_reason_extract custom requires finish_reason_path"
                    ),
                ));
            }
        }
        _ => {
            return Err(invalid(
                file,
                format!(
                    "provider {provider:?}: {scope} unsupported finish_reason_extract mode {:?}",
                    cfg.mode
                ),
            ));
        }
    }
    if !p.is_empty() && !p.starts_with("$.") {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} finish_reason_path must start with '$.'"),
        ));
    }
    Ok(())
}

fn validate_balance_config(
    file: &str,
    provider: &str,
    scope: &str,
    cfg: &BalanceQueryConfig,
) -> Result<(), ProviderError> {
    let mode = cfg.mode.trim().to_lowercase();
    if mode.is_empty() {
        return Ok(());
    }
    if mode != "openai" && mode != "custom" {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} unsupported balance_mode {:?}", cfg.mode),
        ));
    }
    let method = cfg.method.trim().to_uppercase();
    if !method.is_empty() && method != "GET" && method != "POST" {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} method must be GET or POST"),
        ));
    }
    for (name, val) in [("balance_path", &cfg.balance_path), ("used_path", &cfg.used_path)] {
        let v = val.trim();
        if !v.is_empty() && !v.starts_with("$.") {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope} {name} must start with '$.'"),
            ));
        }
    }
    if mode == "custom" {
        if cfg.path.trim().is_empty() {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope} path is required when balance_mode=custom"),
            ));
        }
        if cfg.balance_expr.is_none() && cfg.balance_path.trim().is_empty() {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope} requires balance_path or balance_expr"),
            ));
        }
    }
    let unit = cfg.unit.trim();
    if !unit.is_empty() && unit != "USD" && unit != "CNY" {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} balance_unit must be USD or CNY"),
        ));
    }
    for (name, val) in [
        ("subscription_path", &cfg.subscription_path),
        ("usage_path", &cfg.usage_path),
        ("path", &cfg.path),
    ] {
        validate_url_path(file, provider, scope, name, val)?;
    }
    validate_header_ops(file, provider, &format!("{scope}.headers"), &cfg.headers)
}

fn validate_url_path(
    file: &str,
    provider: &str,
    scope: &str,
    field: &str,
    value: &str,
) -> Result<(), ProviderError> {
    let v = value.trim();
    if v.is_empty() || v.starts_with('/') || v.starts_with("http://") || v.starts_with("https://") {
        return Ok(());
    }
    Err(invalid(
        file,
        format!("provider {provider:?}: {scope} {field} must start with / or http(s)://"),
    ))
}

fn validate_models_config(
    file: &str,
    provider: &str,
    scope: &str,
    cfg: &ModelsQueryConfig,
) -> Result<(), ProviderError> {
    let mode = cfg.mode.trim().to_lowercase();
    if mode.is_empty() {
        return Ok(());
    }
    if mode != "openai" && mode != "gemini" && mode != "custom" {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} unsupported models_mode {:?}", cfg.mode),
        ));
    }
    let method = cfg.method.trim().to_uppercase();
    if !method.is_empty() && method != "GET" && method != "POST" {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} method must be GET or POST"),
        ));
    }
    if mode == "custom" && cfg.path.trim().is_empty() {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} path is required when models_mode=custom"),
        ));
    }
    validate_url_path(file, provider, scope, "path", &cfg.path)?;

    if mode == "custom" && cfg.id_paths.is_empty() {
        return Err(invalid(
            file,
            format!("provider {provider:?}: {scope} requires at least one id_path"),
        ));
    }
    for (i, p) in cfg.id_paths.iter().enumerate() {
        if !p.trim().starts_with("$.") {
            return Err(invalid(
                file,
                format!("provider {provider:?}: {scope} id_path[{i}] must start with '$.'"),
            ));
        }
    }
    for (name, val) in [("id_regex", &cfg.id_regex), ("id_allow_regex", &cfg.id_allow_regex)] {
        let v = val.trim();
        if !v.is_empty() {
            regex::Regex::new(v).map_err(|e| {
                invalid(file, format!("provider {provider:?}: {scope} invalid {name}: {e}"))
            })?;
        }
    }
    validate_header_ops(file, provider, &format!("{scope}.headers"), &cfg.headers)
}

const DEPRECATED_DIRECTIVE_ALIASES: &[(&str, &str)] = &[
    ("input_tokens", "input_tokens_expr"),
    ("output_tokens", "output_tokens_expr"),
    ("cache_read_tokens", "cache_read_tokens_expr"),
    ("cache_write_tokens", "cache_write_tokens_expr"),
    ("total_tokens", "total_tokens_expr"),
    ("used", "used_expr"),
];

/// Walk the token stream and collect warnings for deprecated directive
/// spellings, sorted by position. Identifiers only count at statement
/// starts.
pub fn collect_deprecated_directive_warnings(path: &str, content: &str) -> Vec<ValidationWarning> {
    let mut s = Scanner::new(path, content);
    let mut out = Vec::new();
    let mut prev = TokenKind::Eof;
    loop {
        let Ok(tok) = s.next() else {
            break;
        };
        if tok.kind == TokenKind::Eof {
            break;
        }
        if tok.kind != TokenKind::Ident {
            prev = tok.kind;
            continue;
        }
        let at_stmt_start = matches!(
            prev,
            TokenKind::Eof | TokenKind::Semi | TokenKind::LBrace | TokenKind::RBrace
        );
        if at_stmt_start {
            if let Some((_, replacement)) =
                DEPRECATED_DIRECTIVE_ALIASES.iter().find(|(old, _)| *old == tok.text)
            {
                let (line, column) = s.line_col(tok.pos);
                out.push(ValidationWarning {
                    file: path.to_string(),
                    line,
                    column,
                    directive: tok.text.clone(),
                    message: format!(
                        "directive {:?} is deprecated; use {:?}",
                        tok.text, replacement
                    ),
                });
            }
        }
        prev = tok.kind;
    }
    out.sort_by(|a, b| {
        (&a.file, a.line, a.column, &a.directive).cmp(&(&b.file, b.line, b.column, &b.directive))
    });
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_conf(dir: &std::path::Path, name: &str, content: &str) -> String {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    const VALID: &str = r#"
syntax "next-router/0.1";
provider "openai" {
  defaults {
    upstream_config { base_url = "https://api.openai.com"; }
    auth { auth_bearer; }
    response { resp_passthrough; }
    metrics { usage_extract openai; }
  }
  match api = "chat.completions" {
    upstream { set_path "/v1/chat/completions"; }
  }
}
"#;

    #[test]
    fn test_valid_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(dir.path(), "openai.conf", VALID);
        let pf = validate_provider_file(&path).unwrap();
        assert_eq!(pf.name, "openai");
        assert_eq!(pf.routing.base_url, "https://api.openai.com");
    }

    #[test]
    fn test_filename_stem_must_match_declared_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(dir.path(), "other.conf", VALID);
        let err = validate_provider_file(&path).unwrap_err();
        assert!(format!("{err}").contains("expected"), "{err}");
    }

    #[test]
    fn test_base_url_must_be_absolute_literal() {
        let dir = tempfile::tempdir().unwrap();
        let bad = VALID.replace("\"https://api.openai.com\"", "\"not-a-url\"");
        let path = write_conf(dir.path(), "openai.conf", &bad);
        assert!(validate_provider_file(&path).is_err());

        let expr = VALID.replace("\"https://api.openai.com\"", "$channel.base_url");
        let path = write_conf(dir.path(), "openai.conf", &expr);
        assert!(validate_provider_file(&path).is_err());
    }

    #[test]
    fn test_unknown_sse_parse_mode_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bad = VALID.replace("resp_passthrough;", "sse_parse bogus_mode;");
        let path = write_conf(dir.path(), "openai.conf", &bad);
        let err = validate_provider_file(&path).unwrap_err();
        assert!(format!("{err}").contains("sse_parse"), "{err}");
    }

    #[test]
    fn test_custom_usage_requires_fields() {
        let dir = tempfile::tempdir().unwrap();
        let bad = VALID.replace("usage_extract openai;", "usage_extract custom;");
        let path = write_conf(dir.path(), "openai.conf", &bad);
        assert!(validate_provider_file(&path).is_err());
    }

    #[test]
    fn test_dir_load_ignores_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        write_conf(dir.path(), "openai.conf", VALID);
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        write_conf(&sub, "openai.conf", VALID);
        let (files, _) = validate_providers_dir(&dir.path().to_string_lossy()).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_deprecated_directive_warnings() {
        let content = r#"
syntax "next-router/0.1";
provider "x" {
  defaults {
    metrics {
      usage_extract custom;
      input_tokens = $.a;
      output_tokens = $.b;
    }
  }
}
"#;
        let warnings = collect_deprecated_directive_warnings("x.conf", content);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].directive, "input_tokens");
        assert!(warnings[0].line < warnings[1].line);
    }
}
