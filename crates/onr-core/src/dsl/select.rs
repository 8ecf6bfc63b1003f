//! First-match-wins selection with defaults merging.
//!
//! For a given `(api, stream)` each phase picks the first match whose rule
//! applies, then overlays it on the defaults: non-empty override fields
//! replace the base, list fields append (balance headers replace, matching
//! the original semantics).

use super::types::*;

/// Merge a match override onto the defaults for one directive domain.
pub trait Overlay: Clone {
    fn overlay(base: Self, over: &Self) -> Self;
}

impl<T: Overlay> Phase<T> {
    /// Selected configuration for `(api, stream)`: defaults overlaid by the
    /// first matching rule. Never looks past the first match.
    pub fn select(&self, api: &str, stream: bool) -> T {
        let base = self.defaults.clone();
        match self.matches.iter().find(|(r, _)| r.matches(api, stream)) {
            Some((_, over)) => T::overlay(base, over),
            None => base,
        }
    }
}

impl Overlay for PhaseHeaders {
    fn overlay(mut base: Self, over: &Self) -> Self {
        base.auth.extend(over.auth.iter().cloned());
        base.request.extend(over.request.iter().cloned());
        if over.oauth.is_configured() || !over.oauth.is_empty() {
            base.oauth = merge_oauth(base.oauth, &over.oauth);
        }
        base
    }
}

fn merge_oauth(mut base: OAuthDirective, over: &OAuthDirective) -> OAuthDirective {
    if !over.mode.is_empty() {
        base.mode = over.mode.clone();
    }
    if over.token_url.is_some() {
        base.token_url = over.token_url.clone();
    }
    if over.client_id.is_some() {
        base.client_id = over.client_id.clone();
    }
    if over.client_secret.is_some() {
        base.client_secret = over.client_secret.clone();
    }
    if over.refresh_token.is_some() {
        base.refresh_token = over.refresh_token.clone();
    }
    if over.scope.is_some() {
        base.scope = over.scope.clone();
    }
    if over.audience.is_some() {
        base.audience = over.audience.clone();
    }
    if !over.method.is_empty() {
        base.method = over.method.clone();
    }
    if !over.content_type.is_empty() {
        base.content_type = over.content_type.clone();
    }
    if !over.token_path.is_empty() {
        base.token_path = over.token_path.clone();
    }
    if !over.expires_in_path.is_empty() {
        base.expires_in_path = over.expires_in_path.clone();
    }
    if !over.token_type_path.is_empty() {
        base.token_type_path = over.token_type_path.clone();
    }
    if over.timeout_ms.is_some() {
        base.timeout_ms = over.timeout_ms;
    }
    if over.refresh_skew_sec.is_some() {
        base.refresh_skew_sec = over.refresh_skew_sec;
    }
    if over.fallback_ttl_sec.is_some() {
        base.fallback_ttl_sec = over.fallback_ttl_sec;
    }
    if !over.form.is_empty() {
        base.form = over.form.clone();
    }
    base
}

impl Overlay for RequestTransform {
    fn overlay(mut base: Self, over: &Self) -> Self {
        if !over.req_map.is_empty() {
            base.req_map = over.req_map.clone();
        }
        base.json_ops.extend(over.json_ops.iter().cloned());
        base.model_map.extend(over.model_map.iter().cloned());
        if over.model_map_default.is_some() {
            base.model_map_default = over.model_map_default.clone();
        }
        base
    }
}

impl Overlay for ResponseDirective {
    fn overlay(mut base: Self, over: &Self) -> Self {
        if over.op != ResponseOp::Unset {
            base.op = over.op.clone();
        }
        base.json_ops.extend(over.json_ops.iter().cloned());
        base.sse_del_if.extend(over.sse_del_if.iter().cloned());
        base
    }
}

impl Overlay for ErrorDirective {
    fn overlay(mut base: Self, over: &Self) -> Self {
        if !over.mode.is_empty() {
            base.mode = over.mode.clone();
        }
        base
    }
}

impl Overlay for UsageExtractConfig {
    fn overlay(mut base: Self, over: &Self) -> Self {
        if !over.mode.is_empty() {
            base.mode = over.mode.clone();
        }
        if over.input_tokens_expr.is_some() {
            base.input_tokens_expr = over.input_tokens_expr.clone();
        }
        if over.output_tokens_expr.is_some() {
            base.output_tokens_expr = over.output_tokens_expr.clone();
        }
        if over.cache_read_tokens_expr.is_some() {
            base.cache_read_tokens_expr = over.cache_read_tokens_expr.clone();
        }
        if over.cache_write_tokens_expr.is_some() {
            base.cache_write_tokens_expr = over.cache_write_tokens_expr.clone();
        }
        if over.total_tokens_expr.is_some() {
            base.total_tokens_expr = over.total_tokens_expr.clone();
        }
        if !over.input_tokens_path.is_empty() {
            base.input_tokens_path = over.input_tokens_path.clone();
        }
        if !over.output_tokens_path.is_empty() {
            base.output_tokens_path = over.output_tokens_path.clone();
        }
        if !over.cache_read_tokens_path.is_empty() {
            base.cache_read_tokens_path = over.cache_read_tokens_path.clone();
        }
        if !over.cache_write_tokens_path.is_empty() {
            base.cache_write_tokens_path = over.cache_write_tokens_path.clone();
        }
        base
    }
}

impl Overlay for FinishReasonExtractConfig {
    fn overlay(mut base: Self, over: &Self) -> Self {
        if !over.mode.is_empty() {
            base.mode = over.mode.clone();
        }
        if !over.finish_reason_path.is_empty() {
            base.finish_reason_path = over.finish_reason_path.clone();
        }
        base
    }
}

impl Overlay for BalanceQueryConfig {
    fn overlay(mut base: Self, over: &Self) -> Self {
        if !over.mode.is_empty() {
            base.mode = over.mode.clone();
        }
        if !over.method.is_empty() {
            base.method = over.method.clone();
        }
        if !over.path.is_empty() {
            base.path = over.path.clone();
        }
        if !over.balance_path.is_empty() {
            base.balance_path = over.balance_path.clone();
        }
        if over.balance_expr.is_some() {
            base.balance_expr = over.balance_expr.clone();
        }
        if !over.used_path.is_empty() {
            base.used_path = over.used_path.clone();
        }
        if over.used_expr.is_some() {
            base.used_expr = over.used_expr.clone();
        }
        if !over.unit.is_empty() {
            base.unit = over.unit.clone();
        }
        if !over.subscription_path.is_empty() {
            base.subscription_path = over.subscription_path.clone();
        }
        if !over.usage_path.is_empty() {
            base.usage_path = over.usage_path.clone();
        }
        if !over.headers.is_empty() {
            base.headers = over.headers.clone();
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_select_merges_match_over_defaults() {
        let p = Phase {
            defaults: UsageExtractConfig {
                mode: "openai".to_string(),
                input_tokens_path: "$.usage.input".to_string(),
                output_tokens_path: "$.usage.output".to_string(),
                ..UsageExtractConfig::default()
            },
            matches: vec![(
                MatchRule { api: "chat.completions".to_string(), stream: Some(true) },
                UsageExtractConfig {
                    mode: "custom".to_string(),
                    output_tokens_path: "$.x.out".to_string(),
                    ..UsageExtractConfig::default()
                },
            )],
        };

        let cfg = p.select("chat.completions", true);
        assert_eq!(cfg.mode, "custom");
        assert_eq!(cfg.input_tokens_path, "$.usage.input");
        assert_eq!(cfg.output_tokens_path, "$.x.out");
    }

    #[test]
    fn test_first_match_wins_never_looks_past() {
        let p = Phase {
            defaults: ErrorDirective::default(),
            matches: vec![
                (
                    MatchRule { api: String::new(), stream: None },
                    ErrorDirective { mode: "openai".to_string() },
                ),
                (
                    MatchRule { api: "chat.completions".to_string(), stream: None },
                    ErrorDirective { mode: "common".to_string() },
                ),
            ],
        };
        // wildcard first match wins even though the second is more specific
        assert_eq!(p.select("chat.completions", false).mode, "openai");
    }

    #[test]
    fn test_stream_predicate_filters() {
        let p = Phase {
            defaults: ErrorDirective { mode: "passthrough".to_string() },
            matches: vec![(
                MatchRule { api: "chat.completions".to_string(), stream: Some(true) },
                ErrorDirective { mode: "openai".to_string() },
            )],
        };
        assert_eq!(p.select("chat.completions", false).mode, "passthrough");
        assert_eq!(p.select("chat.completions", true).mode, "openai");
    }

    #[test]
    fn test_response_merge_appends_lists() {
        let p = Phase {
            defaults: ResponseDirective {
                op: ResponseOp::RespMap("openai_responses_to_openai_chat".to_string()),
                json_ops: vec![JsonOp::Del { path: "$.a".to_string() }],
                sse_del_if: Vec::new(),
            },
            matches: vec![(
                MatchRule { api: "chat.completions".to_string(), stream: Some(false) },
                ResponseDirective {
                    op: ResponseOp::Unset,
                    json_ops: vec![JsonOp::Del { path: "$.b".to_string() }],
                    sse_del_if: vec![SseJsonDelIf {
                        cond_path: "$.type".to_string(),
                        equals: "x".to_string(),
                        del_path: "$.c".to_string(),
                    }],
                },
            )],
        };
        let cfg = p.select("chat.completions", false);
        assert_eq!(cfg.op, ResponseOp::RespMap("openai_responses_to_openai_chat".to_string()));
        assert_eq!(cfg.json_ops.len(), 2);
        assert_eq!(cfg.sse_del_if.len(), 1);
    }

    #[test]
    fn test_balance_headers_replace_not_append() {
        use crate::expr::Expr;
        let base_hdr = HeaderOp::Set {
            name: "X-A".to_string(),
            value: Expr::Literal("1".to_string()),
        };
        let over_hdr = HeaderOp::Set {
            name: "X-B".to_string(),
            value: Expr::Literal("2".to_string()),
        };
        let p = Phase {
            defaults: BalanceQueryConfig {
                mode: "openai".to_string(),
                headers: vec![base_hdr],
                ..BalanceQueryConfig::default()
            },
            matches: vec![(
                MatchRule { api: "chat.completions".to_string(), stream: None },
                BalanceQueryConfig {
                    mode: "custom".to_string(),
                    path: "/v1/billing".to_string(),
                    headers: vec![over_hdr],
                    ..BalanceQueryConfig::default()
                },
            )],
        };
        let cfg = p.select("chat.completions", true);
        assert_eq!(cfg.mode, "custom");
        assert_eq!(cfg.path, "/v1/billing");
        assert_eq!(cfg.headers.len(), 1);
        assert!(matches!(&cfg.headers[0], HeaderOp::Set { name, .. } if name == "X-B"));
    }
}
