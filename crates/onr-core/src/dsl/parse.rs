//! Block parsers turning preprocessed `.conf` text into a typed program.
//!
//! The grammar is nginx-like: `syntax "next-router/0.1"; provider "<name>"
//! { defaults { ... } match api = "..." [stream = true|false] { ... } }`.
//! Leaf directives end with `;`. Expression arguments are compiled to
//! [`Expr`] here so requests never re-parse.

use super::scanner::{Scanner, Token, TokenKind};
use super::types::*;
use crate::expr::{BalanceExpr, Expr};

/// Recognized syntax version line.
pub(crate) const SYNTAX_VERSION: &str = "next-router/0.1";

/// Parser output before semantic validation. `routing.base_url` still holds
/// the raw source text; `validate` unquotes and checks it.
#[derive(Debug)]
pub(crate) struct ParsedProvider {
    pub name: String,
    pub routing: ProviderRouting,
    pub headers: Phase<PhaseHeaders>,
    pub request: Phase<RequestTransform>,
    pub response: Phase<ResponseDirective>,
    pub error: Phase<ErrorDirective>,
    pub usage: Phase<UsageExtractConfig>,
    pub finish: Phase<FinishReasonExtractConfig>,
    pub balance: Phase<BalanceQueryConfig>,
    pub models: ModelsQueryConfig,
}

/// Per-block accumulator shared by `defaults` and each `match`.
#[derive(Default)]
struct BlockAcc {
    headers: PhaseHeaders,
    request: RequestTransform,
    response: ResponseDirective,
    error: ErrorDirective,
    usage: UsageExtractConfig,
    finish: FinishReasonExtractConfig,
    balance: BalanceQueryConfig,
    base_url: Option<String>,
    set_path: Option<Expr>,
    query_ops: Vec<QueryOp>,
}

pub(crate) fn parse_provider(path: &str, content: &str) -> Result<ParsedProvider, String> {
    let mut s = Scanner::new(path, content);

    expect_keyword(&mut s, "syntax")?;
    let ver = expect_kind(&mut s, TokenKind::Str, "syntax version string")?;
    expect_kind(&mut s, TokenKind::Semi, "';' after syntax")?;
    let ver_text = crate::expr::unquote(&ver.text);
    if ver_text != SYNTAX_VERSION {
        return Err(s.err_at(&ver, &format!("unsupported syntax version {ver_text:?}")));
    }

    expect_keyword(&mut s, "provider")?;
    let name_tok = expect_kind(&mut s, TokenKind::Str, "provider name string")?;
    let name = crate::expr::unquote(&name_tok.text);
    expect_kind(&mut s, TokenKind::LBrace, "'{' after provider name")?;

    let mut defaults = BlockAcc::default();
    let mut models = ModelsQueryConfig::default();
    let mut matches: Vec<(MatchRule, BlockAcc)> = Vec::new();
    let mut seen_defaults = false;

    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => break,
            TokenKind::Ident if tok.text == "defaults" => {
                if seen_defaults {
                    return Err(s.err_at(&tok, "duplicate defaults block"));
                }
                seen_defaults = true;
                parse_phase_container(&mut s, &mut defaults, Some(&mut models), false)?;
            }
            TokenKind::Ident if tok.text == "match" => {
                let rule = parse_match_header(&mut s)?;
                let mut acc = BlockAcc::default();
                parse_phase_container(&mut s, &mut acc, None, true)?;
                matches.push((rule, acc));
            }
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in provider block")),
            _ => {
                return Err(s.err_at(
                    &tok,
                    &format!("expected 'defaults' or 'match', got {:?}", tok.text),
                ))
            }
        }
    }

    let trailing = s.next()?;
    if trailing.kind != TokenKind::Eof {
        return Err(s.err_at(&trailing, "unexpected content after provider block"));
    }

    Ok(assemble(name, defaults, models, matches))
}

fn assemble(
    name: String,
    defaults: BlockAcc,
    models: ModelsQueryConfig,
    matches: Vec<(MatchRule, BlockAcc)>,
) -> ParsedProvider {
    let mut routing = ProviderRouting {
        base_url: defaults.base_url.clone().unwrap_or_default(),
        matches: Vec::with_capacity(matches.len()),
    };
    let mut headers = Phase { defaults: defaults.headers, matches: Vec::new() };
    let mut request = Phase { defaults: defaults.request, matches: Vec::new() };
    let mut response = Phase { defaults: defaults.response, matches: Vec::new() };
    let mut error = Phase { defaults: defaults.error, matches: Vec::new() };
    let mut usage = Phase { defaults: defaults.usage, matches: Vec::new() };
    let mut finish = Phase { defaults: defaults.finish, matches: Vec::new() };
    let mut balance = Phase { defaults: defaults.balance, matches: Vec::new() };

    for (rule, acc) in matches {
        routing.matches.push(RoutingMatch {
            rule: rule.clone(),
            set_path: acc.set_path,
            query_ops: acc.query_ops,
        });
        headers.matches.push((rule.clone(), acc.headers));
        request.matches.push((rule.clone(), acc.request));
        response.matches.push((rule.clone(), acc.response));
        error.matches.push((rule.clone(), acc.error));
        usage.matches.push((rule.clone(), acc.usage));
        finish.matches.push((rule.clone(), acc.finish));
        balance.matches.push((rule, acc.balance));
    }

    ParsedProvider {
        name,
        routing,
        headers,
        request,
        response,
        error,
        usage,
        finish,
        balance,
        models,
    }
}

fn parse_match_header(s: &mut Scanner) -> Result<MatchRule, String> {
    expect_keyword(s, "api")?;
    expect_kind(s, TokenKind::Eq, "'=' after api")?;
    let api_tok = expect_kind(s, TokenKind::Str, "api name string")?;
    let mut rule = MatchRule { api: crate::expr::unquote(&api_tok.text), stream: None };

    let next = s.next()?;
    match next.kind {
        TokenKind::LBrace => Ok(rule),
        TokenKind::Ident if next.text == "stream" => {
            expect_kind(s, TokenKind::Eq, "'=' after stream")?;
            let v = expect_kind(s, TokenKind::Ident, "true or false")?;
            rule.stream = match v.text.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                other => return Err(s.err_at(&v, &format!("stream must be true|false, got {other:?}"))),
            };
            expect_kind(s, TokenKind::LBrace, "'{' after match header")?;
            Ok(rule)
        }
        _ => Err(s.err_at(&next, "expected '{' or 'stream =' in match header")),
    }
}

/// Parse the body of a `defaults` or `match` block: a sequence of phase
/// sub-blocks until `}`.
fn parse_phase_container(
    s: &mut Scanner,
    acc: &mut BlockAcc,
    mut models: Option<&mut ModelsQueryConfig>,
    in_match: bool,
) -> Result<(), String> {
    if !in_match {
        expect_kind(s, TokenKind::LBrace, "'{' after defaults")?;
    }
    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => return Ok(()),
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in block")),
            TokenKind::Ident => match tok.text.as_str() {
                "upstream_config" if !in_match => parse_upstream_config(s, acc)?,
                "upstream" if in_match => parse_upstream(s, acc)?,
                "auth" => parse_auth(s, &mut acc.headers)?,
                "request" => parse_request(s, acc)?,
                "response" => parse_response(s, &mut acc.response)?,
                "error" => parse_error(s, &mut acc.error)?,
                "metrics" => parse_metrics(s, acc)?,
                "balance" => parse_balance(s, &mut acc.balance)?,
                "models" if !in_match => {
                    let Some(cfg) = models.as_deref_mut() else {
                        return Err(s.err_at(&tok, "models block is only allowed in defaults"));
                    };
                    parse_models(s, cfg)?;
                }
                other => {
                    return Err(s.err_at(&tok, &format!("unknown block {other:?}")));
                }
            },
            _ => return Err(s.err_at(&tok, "expected block name")),
        }
    }
}

fn parse_upstream_config(s: &mut Scanner, acc: &mut BlockAcc) -> Result<(), String> {
    expect_kind(s, TokenKind::LBrace, "'{' after upstream_config")?;
    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => return Ok(()),
            TokenKind::Ident if tok.text == "base_url" => {
                expect_kind(s, TokenKind::Eq, "'=' after base_url")?;
                acc.base_url = Some(s.raw_until_semi()?);
            }
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in upstream_config")),
            _ => return Err(s.err_at(&tok, "unknown directive in upstream_config")),
        }
    }
}

fn parse_upstream(s: &mut Scanner, acc: &mut BlockAcc) -> Result<(), String> {
    expect_kind(s, TokenKind::LBrace, "'{' after upstream")?;
    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => return Ok(()),
            TokenKind::Ident => match tok.text.as_str() {
                "set_path" => {
                    let raw = s.raw_until_semi()?;
                    acc.set_path = Some(compile_expr(s, &tok, &raw)?);
                }
                "set_query" => {
                    let name = name_arg(s)?;
                    let raw = s.raw_until_semi()?;
                    acc.query_ops.push(QueryOp::Set { name, value: compile_expr(s, &tok, &raw)? });
                }
                "del_query" => {
                    let name = name_arg(s)?;
                    expect_kind(s, TokenKind::Semi, "';' after del_query")?;
                    acc.query_ops.push(QueryOp::Del { name });
                }
                other => return Err(s.err_at(&tok, &format!("unknown upstream directive {other:?}"))),
            },
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in upstream")),
            _ => return Err(s.err_at(&tok, "expected directive in upstream")),
        }
    }
}

fn parse_auth(s: &mut Scanner, headers: &mut PhaseHeaders) -> Result<(), String> {
    expect_kind(s, TokenKind::LBrace, "'{' after auth")?;
    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => return Ok(()),
            TokenKind::Ident => match tok.text.as_str() {
                "auth_bearer" => {
                    expect_kind(s, TokenKind::Semi, "';' after auth_bearer")?;
                    headers.auth.push(AuthOp::Bearer);
                }
                "auth_oauth_bearer" => {
                    expect_kind(s, TokenKind::Semi, "';' after auth_oauth_bearer")?;
                    headers.auth.push(AuthOp::OAuthBearer);
                }
                "auth_header_key" => {
                    let name = name_arg(s)?;
                    expect_kind(s, TokenKind::Semi, "';' after auth_header_key")?;
                    headers.auth.push(AuthOp::HeaderKey(name));
                }
                "oauth_mode" => headers.oauth.mode = mode_arg(s)?,
                "oauth_method" => headers.oauth.method = mode_arg(s)?,
                "oauth_content_type" => headers.oauth.content_type = mode_arg(s)?,
                "oauth_token_url" => headers.oauth.token_url = Some(expr_arg(s, &tok)?),
                "oauth_client_id" => headers.oauth.client_id = Some(expr_arg(s, &tok)?),
                "oauth_client_secret" => headers.oauth.client_secret = Some(expr_arg(s, &tok)?),
                "oauth_refresh_token" => headers.oauth.refresh_token = Some(expr_arg(s, &tok)?),
                "oauth_scope" => headers.oauth.scope = Some(expr_arg(s, &tok)?),
                "oauth_audience" => headers.oauth.audience = Some(expr_arg(s, &tok)?),
                "oauth_token_path" => headers.oauth.token_path = path_arg(s)?,
                "oauth_expires_in_path" => headers.oauth.expires_in_path = path_arg(s)?,
                "oauth_token_type_path" => headers.oauth.token_type_path = path_arg(s)?,
                "oauth_timeout_ms" => headers.oauth.timeout_ms = Some(int_arg(s)?),
                "oauth_refresh_skew_sec" => headers.oauth.refresh_skew_sec = Some(int_arg(s)?),
                "oauth_fallback_ttl_sec" => headers.oauth.fallback_ttl_sec = Some(int_arg(s)?),
                "oauth_form" => {
                    let key = name_arg(s)?;
                    let value = expr_arg(s, &tok)?;
                    headers.oauth.form.push((key, value));
                }
                other => return Err(s.err_at(&tok, &format!("unknown auth directive {other:?}"))),
            },
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in auth")),
            _ => return Err(s.err_at(&tok, "expected directive in auth")),
        }
    }
}

fn parse_request(s: &mut Scanner, acc: &mut BlockAcc) -> Result<(), String> {
    expect_kind(s, TokenKind::LBrace, "'{' after request")?;
    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => return Ok(()),
            TokenKind::Ident => match tok.text.as_str() {
                "set_header" => {
                    let name = name_arg(s)?;
                    let value = expr_arg(s, &tok)?;
                    acc.headers.request.push(HeaderOp::Set { name, value });
                }
                "del_header" => {
                    let name = name_arg(s)?;
                    expect_kind(s, TokenKind::Semi, "';' after del_header")?;
                    acc.headers.request.push(HeaderOp::Del { name });
                }
                "model_map" => {
                    let from = name_arg(s)?;
                    let to = expr_arg(s, &tok)?;
                    acc.request.model_map.push((from, to));
                }
                "model_map_default" => acc.request.model_map_default = Some(expr_arg(s, &tok)?),
                "req_map" => acc.request.req_map = mode_arg(s)?,
                "json_set" | "json_set_if_absent" | "json_del" | "json_rename" => {
                    let op = parse_json_op(s, &tok)?;
                    acc.request.json_ops.push(op);
                }
                other => return Err(s.err_at(&tok, &format!("unknown request directive {other:?}"))),
            },
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in request")),
            _ => return Err(s.err_at(&tok, "expected directive in request")),
        }
    }
}

fn parse_response(s: &mut Scanner, resp: &mut ResponseDirective) -> Result<(), String> {
    expect_kind(s, TokenKind::LBrace, "'{' after response")?;
    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => return Ok(()),
            TokenKind::Ident => match tok.text.as_str() {
                "resp_passthrough" => {
                    expect_kind(s, TokenKind::Semi, "';' after resp_passthrough")?;
                    resp.op = ResponseOp::Passthrough;
                }
                "resp_map" => resp.op = ResponseOp::RespMap(mode_arg(s)?),
                "sse_parse" => resp.op = ResponseOp::SseParse(mode_arg(s)?),
                "json_set" | "json_set_if_absent" | "json_del" | "json_rename" => {
                    let op = parse_json_op(s, &tok)?;
                    resp.json_ops.push(op);
                }
                "sse_json_del_if" => {
                    let cond_path = path_arg(s)?;
                    let equals = name_arg(s)?;
                    let del_path = path_arg(s)?;
                    expect_kind(s, TokenKind::Semi, "';' after sse_json_del_if")?;
                    resp.sse_del_if.push(SseJsonDelIf { cond_path, equals, del_path });
                }
                other => {
                    return Err(s.err_at(&tok, &format!("unknown response directive {other:?}")))
                }
            },
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in response")),
            _ => return Err(s.err_at(&tok, "expected directive in response")),
        }
    }
}

fn parse_error(s: &mut Scanner, err: &mut ErrorDirective) -> Result<(), String> {
    expect_kind(s, TokenKind::LBrace, "'{' after error")?;
    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => return Ok(()),
            TokenKind::Ident if tok.text == "error_map" => err.mode = mode_arg(s)?,
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in error")),
            _ => return Err(s.err_at(&tok, "unknown directive in error")),
        }
    }
}

fn parse_metrics(s: &mut Scanner, acc: &mut BlockAcc) -> Result<(), String> {
    expect_kind(s, TokenKind::LBrace, "'{' after metrics")?;
    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => return Ok(()),
            TokenKind::Ident => match tok.text.as_str() {
                "usage_extract" => acc.usage.mode = mode_arg(s)?,
                // `<name>` is the deprecated alias of `<name>_expr`; both parse.
                "input_tokens" | "input_tokens_expr" => {
                    acc.usage.input_tokens_expr = Some(balance_expr_arg(s, &tok)?)
                }
                "output_tokens" | "output_tokens_expr" => {
                    acc.usage.output_tokens_expr = Some(balance_expr_arg(s, &tok)?)
                }
                "cache_read_tokens" | "cache_read_tokens_expr" => {
                    acc.usage.cache_read_tokens_expr = Some(balance_expr_arg(s, &tok)?)
                }
                "cache_write_tokens" | "cache_write_tokens_expr" => {
                    acc.usage.cache_write_tokens_expr = Some(balance_expr_arg(s, &tok)?)
                }
                "total_tokens" | "total_tokens_expr" => {
                    acc.usage.total_tokens_expr = Some(balance_expr_arg(s, &tok)?)
                }
                "input_tokens_path" => acc.usage.input_tokens_path = path_arg_semi(s)?,
                "output_tokens_path" => acc.usage.output_tokens_path = path_arg_semi(s)?,
                "cache_read_tokens_path" => acc.usage.cache_read_tokens_path = path_arg_semi(s)?,
                "cache_write_tokens_path" => acc.usage.cache_write_tokens_path = path_arg_semi(s)?,
                "finish_reason_extract" => acc.finish.mode = mode_arg(s)?,
                "finish_reason_path" => acc.finish.finish_reason_path = path_arg_semi(s)?,
                other => return Err(s.err_at(&tok, &format!("unknown metrics directive {other:?}"))),
            },
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in metrics")),
            _ => return Err(s.err_at(&tok, "expected directive in metrics")),
        }
    }
}

fn parse_balance(s: &mut Scanner, cfg: &mut BalanceQueryConfig) -> Result<(), String> {
    expect_kind(s, TokenKind::LBrace, "'{' after balance")?;
    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => return Ok(()),
            TokenKind::Ident => match tok.text.as_str() {
                "balance_mode" => cfg.mode = mode_arg(s)?,
                "method" => cfg.method = field_arg(s)?,
                "path" => cfg.path = field_arg(s)?,
                "balance_path" => cfg.balance_path = path_arg_semi(s)?,
                "used_path" => cfg.used_path = path_arg_semi(s)?,
                "balance_unit" => cfg.unit = field_arg(s)?,
                "subscription_path" => cfg.subscription_path = field_arg(s)?,
                "usage_path" => cfg.usage_path = field_arg(s)?,
                "balance" | "balance_expr" => cfg.balance_expr = Some(balance_expr_arg(s, &tok)?),
                "used" | "used_expr" => cfg.used_expr = Some(balance_expr_arg(s, &tok)?),
                "set_header" => {
                    let name = name_arg(s)?;
                    let value = expr_arg(s, &tok)?;
                    cfg.headers.push(HeaderOp::Set { name, value });
                }
                "del_header" => {
                    let name = name_arg(s)?;
                    expect_kind(s, TokenKind::Semi, "';' after del_header")?;
                    cfg.headers.push(HeaderOp::Del { name });
                }
                other => return Err(s.err_at(&tok, &format!("unknown balance directive {other:?}"))),
            },
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in balance")),
            _ => return Err(s.err_at(&tok, "expected directive in balance")),
        }
    }
}

fn parse_models(s: &mut Scanner, cfg: &mut ModelsQueryConfig) -> Result<(), String> {
    expect_kind(s, TokenKind::LBrace, "'{' after models")?;
    loop {
        let tok = s.next()?;
        match tok.kind {
            TokenKind::RBrace => return Ok(()),
            TokenKind::Ident => match tok.text.as_str() {
                "models_mode" => cfg.mode = mode_arg(s)?,
                "method" => cfg.method = field_arg(s)?,
                "path" => cfg.path = field_arg(s)?,
                "id_path" => {
                    let p = path_arg_semi(s)?;
                    if !p.is_empty() {
                        cfg.id_paths.push(p);
                    }
                }
                "id_regex" => cfg.id_regex = field_arg(s)?,
                "id_allow_regex" => cfg.id_allow_regex = field_arg(s)?,
                "set_header" => {
                    let name = name_arg(s)?;
                    let value = expr_arg(s, &tok)?;
                    cfg.headers.push(HeaderOp::Set { name, value });
                }
                "del_header" => {
                    let name = name_arg(s)?;
                    expect_kind(s, TokenKind::Semi, "';' after del_header")?;
                    cfg.headers.push(HeaderOp::Del { name });
                }
                other => return Err(s.err_at(&tok, &format!("unknown models directive {other:?}"))),
            },
            TokenKind::Eof => return Err(s.err_at(&tok, "unexpected EOF in models")),
            _ => return Err(s.err_at(&tok, "expected directive in models")),
        }
    }
}

fn parse_json_op(s: &mut Scanner, tok: &Token) -> Result<JsonOp, String> {
    match tok.text.as_str() {
        "json_set" => {
            let path = path_arg(s)?;
            let value = expr_arg(s, tok)?;
            Ok(JsonOp::Set { path, value })
        }
        "json_set_if_absent" => {
            let path = path_arg(s)?;
            let value = expr_arg(s, tok)?;
            Ok(JsonOp::SetIfAbsent { path, value })
        }
        "json_del" => {
            let path = path_arg(s)?;
            expect_kind(s, TokenKind::Semi, "';' after json_del")?;
            Ok(JsonOp::Del { path })
        }
        "json_rename" => {
            let from = path_arg(s)?;
            let to = path_arg(s)?;
            expect_kind(s, TokenKind::Semi, "';' after json_rename")?;
            Ok(JsonOp::Rename { from, to })
        }
        other => Err(s.err_at(tok, &format!("unknown json op {other:?}"))),
    }
}

// --- argument helpers ------------------------------------------------------

fn expect_kind(s: &mut Scanner, kind: TokenKind, what: &str) -> Result<Token, String> {
    let tok = s.next()?;
    if tok.kind != kind {
        return Err(s.err_at(&tok, &format!("expected {what}, got {:?}", tok.text)));
    }
    Ok(tok)
}

fn expect_keyword(s: &mut Scanner, kw: &str) -> Result<(), String> {
    let tok = s.next()?;
    if tok.kind != TokenKind::Ident || tok.text != kw {
        return Err(s.err_at(&tok, &format!("expected {kw:?}, got {:?}", tok.text)));
    }
    Ok(())
}

/// Mode argument: bare identifier followed by `;`.
fn mode_arg(s: &mut Scanner) -> Result<String, String> {
    let tok = s.next()?;
    if tok.kind != TokenKind::Ident {
        return Err(s.err_at(&tok, "expected mode identifier"));
    }
    expect_kind(s, TokenKind::Semi, "';' after mode")?;
    Ok(tok.text)
}

/// Name argument: identifier or quoted string (header names, query params,
/// model names, equals literals).
fn name_arg(s: &mut Scanner) -> Result<String, String> {
    let tok = s.next()?;
    match tok.kind {
        TokenKind::Ident => Ok(tok.text),
        TokenKind::Str => Ok(crate::expr::unquote(&tok.text)),
        _ => Err(s.err_at(&tok, "expected name argument")),
    }
}

/// Quoted JSONPath argument (not the last argument of the statement).
fn path_arg(s: &mut Scanner) -> Result<String, String> {
    let tok = expect_kind(s, TokenKind::Str, "quoted JSONPath")?;
    Ok(crate::expr::unquote(&tok.text).trim().to_string())
}

/// Quoted JSONPath argument followed by `;`.
fn path_arg_semi(s: &mut Scanner) -> Result<String, String> {
    let p = path_arg(s)?;
    expect_kind(s, TokenKind::Semi, "';' after path")?;
    Ok(p)
}

/// Plain field value up to `;` with optional quoting (methods, URL paths,
/// regexes, units).
fn field_arg(s: &mut Scanner) -> Result<String, String> {
    let raw = s.raw_until_semi()?;
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        Ok(crate::expr::unquote(raw))
    } else {
        Ok(raw.to_string())
    }
}

/// Integer argument followed by `;`.
fn int_arg(s: &mut Scanner) -> Result<u64, String> {
    let tok = expect_kind(s, TokenKind::Number, "integer")?;
    expect_kind(s, TokenKind::Semi, "';' after integer")?;
    tok.text.parse().map_err(|_| s.err_at(&tok, "invalid integer"))
}

/// Compile already-read raw expression text, attaching position info.
fn compile_expr(s: &Scanner, at: &Token, raw: &str) -> Result<Expr, String> {
    Expr::parse(raw).map_err(|e| s.err_at(at, &e))
}

/// String expression argument: raw text until `;`, compiled. Accepts an
/// optional leading `=` (eq-form directives).
fn expr_arg(s: &mut Scanner, at: &Token) -> Result<Expr, String> {
    let mut raw = s.raw_until_semi()?;
    if let Some(rest) = raw.strip_prefix('=') {
        raw = rest.trim().to_string();
    }
    Expr::parse(&raw).map_err(|e| s.err_at(at, &e))
}

/// Arithmetic expression argument (metrics/balance custom extraction).
fn balance_expr_arg(s: &mut Scanner, at: &Token) -> Result<BalanceExpr, String> {
    let mut raw = s.raw_until_semi()?;
    if let Some(rest) = raw.strip_prefix('=') {
        raw = rest.trim().to_string();
    }
    BalanceExpr::parse(&raw).map_err(|e| s.err_at(at, &e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
syntax "next-router/0.1";
provider "openai" {
  defaults {
    upstream_config { base_url = "https://api.openai.com"; }
    auth { auth_bearer; }
    error { error_map openai; }
    metrics { usage_extract openai; finish_reason_extract openai; }
  }
  match api = "chat.completions" {
    upstream {
      set_path "/v1/chat/completions";
      set_query "api-version" "2024-01-01";
    }
    request {
      set_header "X-Title" "onr";
      model_map "gpt-4o" "gpt-4o-2024-11-20";
      model_map_default $request.model;
      json_set_if_absent "$.temperature" "1";
    }
    response { resp_passthrough; }
  }
  match api = "responses" stream = true {
    response { sse_parse openai_responses_to_openai_chat_chunks; }
  }
}
"#;

    #[test]
    fn test_parses_full_sample() {
        let p = parse_provider("openai.conf", SAMPLE).unwrap();
        assert_eq!(p.name, "openai");
        assert_eq!(p.routing.base_url, "\"https://api.openai.com\"");
        assert_eq!(p.routing.matches.len(), 2);
        assert_eq!(p.routing.matches[0].rule.api, "chat.completions");
        assert!(p.routing.matches[0].set_path.is_some());
        assert_eq!(p.routing.matches[0].query_ops.len(), 1);
        assert_eq!(p.routing.matches[1].rule.stream, Some(true));

        assert_eq!(p.headers.defaults.auth, vec![AuthOp::Bearer]);
        assert_eq!(p.error.defaults.mode, "openai");
        assert_eq!(p.usage.defaults.mode, "openai");

        let (_, req) = &p.request.matches[0];
        assert_eq!(req.model_map.len(), 1);
        assert!(req.model_map_default.is_some());
        assert_eq!(req.json_ops.len(), 1);

        let (_, resp) = &p.response.matches[1];
        assert_eq!(
            resp.op,
            ResponseOp::SseParse("openai_responses_to_openai_chat_chunks".to_string())
        );
    }

    #[test]
    fn test_rejects_wrong_syntax_version() {
        let src = "syntax \"other/9.9\";\nprovider \"x\" { defaults { } }";
        assert!(parse_provider("x.conf", src).is_err());
    }

    #[test]
    fn test_rejects_unknown_directive() {
        let src = r#"
syntax "next-router/0.1";
provider "x" {
  defaults { request { frobnicate "y"; } }
}
"#;
        let err = parse_provider("x.conf", src).unwrap_err();
        assert!(err.contains("frobnicate"), "{err}");
    }

    #[test]
    fn test_rejects_models_block_in_match() {
        let src = r#"
syntax "next-router/0.1";
provider "x" {
  match api = "chat.completions" { models { models_mode openai; } }
}
"#;
        assert!(parse_provider("x.conf", src).is_err());
    }

    #[test]
    fn test_sse_json_del_if_three_args() {
        let src = r#"
syntax "next-router/0.1";
provider "x" {
  defaults {
    response { sse_json_del_if "$.type" "ping" "$.data"; }
  }
}
"#;
        let p = parse_provider("x.conf", src).unwrap();
        assert_eq!(
            p.response.defaults.sse_del_if,
            vec![SseJsonDelIf {
                cond_path: "$.type".to_string(),
                equals: "ping".to_string(),
                del_path: "$.data".to_string(),
            }]
        );
    }

    #[test]
    fn test_metrics_custom_exprs() {
        let src = r#"
syntax "next-router/0.1";
provider "x" {
  defaults {
    metrics {
      usage_extract custom;
      input_tokens = $.usage.in + $.usage.cached;
      output_tokens_path "$.usage.out";
    }
  }
}
"#;
        let p = parse_provider("x.conf", src).unwrap();
        assert_eq!(p.usage.defaults.mode, "custom");
        assert!(p.usage.defaults.input_tokens_expr.is_some());
        assert_eq!(p.usage.defaults.output_tokens_path, "$.usage.out");
    }
}
