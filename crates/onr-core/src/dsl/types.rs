//! Compiled provider program types.
//!
//! One `.conf` file compiles into a [`ProviderFile`]. All expression
//! arguments are compiled to [`Expr`] at parse time; requests only evaluate.

use crate::expr::{BalanceExpr, Expr};
use serde::Serialize;

/// Compiled form of one provider `.conf`. Immutable once published.
#[derive(Debug, Clone)]
pub struct ProviderFile {
    /// Lower-case provider name; must equal the filename stem.
    pub name: String,
    /// Source path the file was loaded from.
    pub path: String,
    /// Preprocessed content; used as the reload fingerprint.
    pub content: String,

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

/// A conditional selector: api name (empty = wildcard) plus an optional
/// stream predicate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchRule {
    pub api: String,
    pub stream: Option<bool>,
}

impl MatchRule {
    pub fn matches(&self, api: &str, stream: bool) -> bool {
        if !self.api.is_empty() && self.api != api {
            return false;
        }
        match self.stream {
            Some(want) => want == stream,
            None => true,
        }
    }
}

/// Defaults plus ordered per-match overrides for one directive domain.
#[derive(Debug, Clone, Default)]
pub struct Phase<T> {
    pub defaults: T,
    pub matches: Vec<(MatchRule, T)>,
}

/// Upstream routing: the provider base URL and per-match path/query ops.
#[derive(Debug, Clone, Default)]
pub struct ProviderRouting {
    /// Validated absolute URL literal from `upstream_config.base_url`.
    pub base_url: String,
    pub matches: Vec<RoutingMatch>,
}

#[derive(Debug, Clone)]
pub struct RoutingMatch {
    pub rule: MatchRule,
    pub set_path: Option<Expr>,
    pub query_ops: Vec<QueryOp>,
}

#[derive(Debug, Clone)]
pub enum QueryOp {
    Set { name: String, value: Expr },
    Del { name: String },
}

impl ProviderRouting {
    /// First routing match for `(api, stream)`, if any.
    pub fn select(&self, api: &str, stream: bool) -> Option<&RoutingMatch> {
        self.matches.iter().find(|m| m.rule.matches(api, stream))
    }

    pub fn has_match_api(&self, api: &str) -> bool {
        self.matches.iter().any(|m| m.rule.api == api)
    }
}

/// Upstream auth header composition.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOp {
    /// `Authorization: Bearer <channel.key>`
    Bearer,
    /// `<Header-Name>: <channel.key>`
    HeaderKey(String),
    /// `Authorization: Bearer <oauth.access_token>`
    OAuthBearer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderOp {
    Set { name: String, value: Expr },
    Del { name: String },
}

/// Header directives for one phase: auth-block ops, request-block ops, and
/// the OAuth exchange configuration.
#[derive(Debug, Clone, Default)]
pub struct PhaseHeaders {
    pub auth: Vec<AuthOp>,
    pub request: Vec<HeaderOp>,
    pub oauth: OAuthDirective,
}

/// OAuth token-exchange configuration from the `auth` block.
#[derive(Debug, Clone, Default)]
pub struct OAuthDirective {
    /// One of the whitelisted modes; empty when OAuth is not configured.
    pub mode: String,
    pub token_url: Option<Expr>,
    pub client_id: Option<Expr>,
    pub client_secret: Option<Expr>,
    pub refresh_token: Option<Expr>,
    pub scope: Option<Expr>,
    pub audience: Option<Expr>,
    pub method: String,
    pub content_type: String,
    pub token_path: String,
    pub expires_in_path: String,
    pub token_type_path: String,
    pub timeout_ms: Option<u64>,
    pub refresh_skew_sec: Option<u64>,
    pub fallback_ttl_sec: Option<u64>,
    pub form: Vec<(String, Expr)>,
}

impl OAuthDirective {
    pub fn is_empty(&self) -> bool {
        self.mode.is_empty()
            && self.token_url.is_none()
            && self.form.is_empty()
            && self.token_path.is_empty()
    }

    pub fn is_configured(&self) -> bool {
        !self.mode.is_empty()
    }
}

/// JSON tree operations applied to request or response bodies, in order.
#[derive(Debug, Clone)]
pub enum JsonOp {
    Set { path: String, value: Expr },
    SetIfAbsent { path: String, value: Expr },
    Del { path: String },
    Rename { from: String, to: String },
}

/// Request-phase transform: body codec, JSON ops, and model mapping.
#[derive(Debug, Clone, Default)]
pub struct RequestTransform {
    /// `req_map <mode>`; empty when no schema mapping applies.
    pub req_map: String,
    pub json_ops: Vec<JsonOp>,
    /// Ordered `(from-model, to-expr)` pairs.
    pub model_map: Vec<(String, Expr)>,
    pub model_map_default: Option<Expr>,
}

/// Response directive operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResponseOp {
    /// No explicit directive; treated as passthrough.
    #[default]
    Unset,
    Passthrough,
    RespMap(String),
    SseParse(String),
}

#[derive(Debug, Clone, Default)]
pub struct ResponseDirective {
    pub op: ResponseOp,
    pub json_ops: Vec<JsonOp>,
    pub sse_del_if: Vec<SseJsonDelIf>,
}

/// `sse_json_del_if <cond-path> <equals> <del-path>`: for each SSE JSON
/// payload, delete `del_path` when `cond_path` equals the literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseJsonDelIf {
    pub cond_path: String,
    pub equals: String,
    pub del_path: String,
}

/// `error { error_map <mode>; }` — mode in {openai, common, passthrough}.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDirective {
    pub mode: String,
}

/// Token usage extraction configuration from the `metrics` block.
#[derive(Debug, Clone, Default)]
pub struct UsageExtractConfig {
    /// openai | anthropic | gemini | custom; empty when unset.
    pub mode: String,
    pub input_tokens_expr: Option<BalanceExpr>,
    pub output_tokens_expr: Option<BalanceExpr>,
    pub cache_read_tokens_expr: Option<BalanceExpr>,
    pub cache_write_tokens_expr: Option<BalanceExpr>,
    pub total_tokens_expr: Option<BalanceExpr>,
    pub input_tokens_path: String,
    pub output_tokens_path: String,
    pub cache_read_tokens_path: String,
    pub cache_write_tokens_path: String,
}

/// Finish-reason extraction configuration from the `metrics` block.
#[derive(Debug, Clone, Default)]
pub struct FinishReasonExtractConfig {
    pub mode: String,
    pub finish_reason_path: String,
}

/// Balance query configuration (admin path, not the request hot path).
#[derive(Debug, Clone, Default)]
pub struct BalanceQueryConfig {
    pub mode: String,
    pub method: String,
    pub path: String,
    pub balance_path: String,
    pub balance_expr: Option<BalanceExpr>,
    pub used_path: String,
    pub used_expr: Option<BalanceExpr>,
    pub unit: String,
    pub subscription_path: String,
    pub usage_path: String,
    pub headers: Vec<HeaderOp>,
}

/// Models-list query configuration (admin path).
#[derive(Debug, Clone, Default)]
pub struct ModelsQueryConfig {
    pub mode: String,
    pub method: String,
    pub path: String,
    pub id_paths: Vec<String>,
    pub id_regex: String,
    pub id_allow_regex: String,
    pub headers: Vec<HeaderOp>,
}

/// Provider summary exposed by the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub name: String,
    pub base_url: String,
    pub apis: Vec<String>,
}

impl ProviderFile {
    pub fn summary(&self) -> ProviderSummary {
        let mut apis: Vec<String> = self
            .routing
            .matches
            .iter()
            .map(|m| m.rule.api.clone())
            .filter(|a| !a.is_empty())
            .collect();
        apis.dedup();
        ProviderSummary { name: self.name.clone(), base_url: self.routing.base_url.clone(), apis }
    }
}

/// Normalize a provider name: trim and lower-case.
pub fn normalize_provider_name(name: &str) -> String {
    name.trim().to_lowercase()
}
