//! The DSL expression language.
//!
//! Intentionally minimal: quoted string literals, `concat(a, b, ...)`, and
//! five variables (`$channel.base_url`, `$channel.key`,
//! `$oauth.access_token`, `$request.model`, `$request.model_mapped`).
//! Anything else is rejected at validate time. Arithmetic exists only in
//! balance expressions (`ParseBalanceExpr`), off the hot path.

use crate::jsonutil;
use crate::meta::Meta;
use serde_json::Value;

/// A compiled string expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(String),
    Var(Var),
    Concat(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    ChannelBaseUrl,
    ChannelKey,
    OAuthAccessToken,
    RequestModel,
    RequestModelMapped,
}

impl Var {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "$channel.base_url" => Some(Self::ChannelBaseUrl),
            "$channel.key" => Some(Self::ChannelKey),
            "$oauth.access_token" => Some(Self::OAuthAccessToken),
            "$request.model" => Some(Self::RequestModel),
            "$request.model_mapped" => Some(Self::RequestModelMapped),
            _ => None,
        }
    }
}

impl Expr {
    /// Parse one expression source string.
    pub fn parse(src: &str) -> Result<Self, String> {
        let s = src.trim();
        if s.is_empty() {
            return Err("empty expression".to_string());
        }
        if let Some(inner) = s.strip_prefix("concat(") {
            let Some(args) = inner.strip_suffix(')') else {
                return Err(format!("unterminated concat in {s:?}"));
            };
            let mut parts = Vec::new();
            for arg in split_concat_args(args)? {
                parts.push(Self::parse(&arg)?);
            }
            if parts.is_empty() {
                return Err("concat() requires at least one argument".to_string());
            }
            return Ok(Self::Concat(parts));
        }
        if s.starts_with('"') {
            if !s.ends_with('"') || s.len() < 2 {
                return Err(format!("unterminated string literal {s:?}"));
            }
            return Ok(Self::Literal(unquote(s)));
        }
        if s.starts_with('$') {
            return Var::parse(s)
                .map(Self::Var)
                .ok_or_else(|| format!("unknown variable {s:?}"));
        }
        Err(format!("unsupported expression {s:?}"))
    }

    /// Evaluate against per-request metadata.
    pub fn eval(&self, meta: &Meta) -> String {
        match self {
            Self::Literal(s) => s.clone(),
            Self::Var(v) => match v {
                Var::ChannelBaseUrl => {
                    if meta.channel_base_url.is_empty() {
                        meta.base_url.clone()
                    } else {
                        meta.channel_base_url.clone()
                    }
                }
                Var::ChannelKey => meta.channel_key.clone(),
                Var::OAuthAccessToken => meta.oauth_access_token.clone(),
                Var::RequestModel => meta.model.clone(),
                Var::RequestModelMapped => meta.effective_model().to_string(),
            },
            Self::Concat(parts) => {
                let mut out = String::new();
                for p in parts {
                    out.push_str(&p.eval(meta));
                }
                out
            }
        }
    }
}

/// Split comma-separated concat args, honoring quotes and nested parens.
fn split_concat_args(s: &str) -> Result<Vec<String>, String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    let mut cur = String::new();
    for ch in s.chars() {
        if in_str {
            cur.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_str = true;
                cur.push(ch);
            }
            '(' => {
                depth += 1;
                cur.push(ch);
            }
            ')' => {
                depth = depth.checked_sub(1).ok_or("unbalanced ')' in concat")?;
                cur.push(ch);
            }
            ',' if depth == 0 => {
                out.push(std::mem::take(&mut cur));
            }
            _ => cur.push(ch),
        }
    }
    if in_str {
        return Err("unterminated string in concat".to_string());
    }
    if !cur.trim().is_empty() || !out.is_empty() {
        out.push(cur);
    }
    Ok(out.into_iter().map(|a| a.trim().to_string()).collect())
}

/// Strip surrounding quotes and process `\"` / `\\` escapes.
pub fn unquote(s: &str) -> String {
    let inner = &s[1..s.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            match ch {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                other => out.push(other),
            }
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Balance expressions: + - * / over JSON paths and numeric literals.
// ---------------------------------------------------------------------------

/// A parsed arithmetic expression used by `balance`/`used` directives.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceExpr {
    Number(f64),
    Path(String),
    Binary {
        op: BalanceOp,
        lhs: Box<BalanceExpr>,
        rhs: Box<BalanceExpr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BalanceExpr {
    /// Parse an arithmetic expression. Standard precedence; parentheses
    /// supported.
    pub fn parse(src: &str) -> Result<Self, String> {
        let tokens = lex_balance(src)?;
        let mut pos = 0;
        let expr = parse_add(&tokens, &mut pos)?;
        if pos != tokens.len() {
            return Err(format!("unexpected trailing token in {src:?}"));
        }
        Ok(expr)
    }

    /// Evaluate against a response JSON object. Missing paths read as 0;
    /// division by zero yields 0.
    pub fn eval(&self, root: &Value) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Path(p) => jsonutil::get_float(root, p),
            Self::Binary { op, lhs, rhs } => {
                let l = lhs.eval(root);
                let r = rhs.eval(root);
                match op {
                    BalanceOp::Add => l + r,
                    BalanceOp::Sub => l - r,
                    BalanceOp::Mul => l * r,
                    BalanceOp::Div => {
                        if r == 0.0 {
                            0.0
                        } else {
                            l / r
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum BalTok {
    Num(f64),
    Path(String),
    Op(char),
    LParen,
    RParen,
}

fn lex_balance(src: &str) -> Result<Vec<BalTok>, String> {
    let mut out = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' | '-' | '*' | '/' => {
                out.push(BalTok::Op(c));
                i += 1;
            }
            '(' => {
                out.push(BalTok::LParen);
                i += 1;
            }
            ')' => {
                out.push(BalTok::RParen);
                i += 1;
            }
            '$' => {
                let start = i;
                while i < chars.len()
                    && !matches!(chars[i], ' ' | '\t' | '+' | '-' | '*' | '/' | '(' | ')')
                {
                    i += 1;
                }
                let path: String = chars[start..i].iter().collect();
                jsonutil::parse_path(&path)?;
                out.push(BalTok::Path(path));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text.parse().map_err(|_| format!("invalid number {text:?}"))?;
                out.push(BalTok::Num(n));
            }
            other => return Err(format!("unexpected char {other:?} in balance expr")),
        }
    }
    if out.is_empty() {
        return Err("empty balance expression".to_string());
    }
    Ok(out)
}

fn parse_add(tokens: &[BalTok], pos: &mut usize) -> Result<BalanceExpr, String> {
    let mut lhs = parse_mul(tokens, pos)?;
    while let Some(BalTok::Op(op @ ('+' | '-'))) = tokens.get(*pos) {
        let op = if *op == '+' { BalanceOp::Add } else { BalanceOp::Sub };
        *pos += 1;
        let rhs = parse_mul(tokens, pos)?;
        lhs = BalanceExpr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
}

fn parse_mul(tokens: &[BalTok], pos: &mut usize) -> Result<BalanceExpr, String> {
    let mut lhs = parse_atom(tokens, pos)?;
    while let Some(BalTok::Op(op @ ('*' | '/'))) = tokens.get(*pos) {
        let op = if *op == '*' { BalanceOp::Mul } else { BalanceOp::Div };
        *pos += 1;
        let rhs = parse_atom(tokens, pos)?;
        lhs = BalanceExpr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
}

fn parse_atom(tokens: &[BalTok], pos: &mut usize) -> Result<BalanceExpr, String> {
    match tokens.get(*pos) {
        Some(BalTok::Num(n)) => {
            *pos += 1;
            Ok(BalanceExpr::Number(*n))
        }
        Some(BalTok::Path(p)) => {
            *pos += 1;
            Ok(BalanceExpr::Path(p.clone()))
        }
        Some(BalTok::LParen) => {
            *pos += 1;
            let inner = parse_add(tokens, pos)?;
            match tokens.get(*pos) {
                Some(BalTok::RParen) => {
                    *pos += 1;
                    Ok(inner)
                }
                _ => Err("missing ')'".to_string()),
            }
        }
        other => Err(format!("unexpected token {other:?}")),
    }
}
