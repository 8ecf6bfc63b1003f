//! Static directive metadata powering admin validation and editor
//! affordances. Not consulted on the hot path.

/// Editor-facing metadata for one DSL directive.
///
/// `block` uses normalized names: `top` for file-level statements, other
/// values match block names in the DSL (provider/defaults/auth/...).
#[derive(Debug, Clone, Copy)]
pub struct DirectiveMetadata {
    pub name: &'static str,
    pub block: &'static str,
    pub hover: &'static str,
    pub modes: &'static [&'static str],
}

const NO_MODES: &[&str] = &[];

static DIRECTIVE_METADATA: &[DirectiveMetadata] = &[
    DirectiveMetadata { name: "syntax", block: "top", hover: "`syntax \"next-router/0.1\";`\n\nDeclares DSL syntax version for this file.", modes: NO_MODES },
    DirectiveMetadata { name: "provider", block: "top", hover: "`provider \"name\" { ... }`\n\nDefines one provider DSL block. File name should match provider name.", modes: NO_MODES },

    DirectiveMetadata { name: "defaults", block: "provider", hover: "`defaults { ... }`\n\nDefault phases shared by all `match` rules unless overridden.", modes: NO_MODES },
    DirectiveMetadata { name: "match", block: "provider", hover: "`match api = \"...\" [stream = true|false] { ... }`\n\nRoute rule. First match wins.", modes: NO_MODES },

    DirectiveMetadata { name: "upstream_config", block: "defaults", hover: "`upstream_config { base_url = \"...\"; }`\n\nProvider-level upstream base URL config.", modes: NO_MODES },
    DirectiveMetadata { name: "auth", block: "defaults", hover: "`auth { ... }`\n\nAuthentication directives for upstream requests.", modes: NO_MODES },
    DirectiveMetadata { name: "request", block: "defaults", hover: "`request { ... }`\n\nRequest rewrite/transform directives.", modes: NO_MODES },
    DirectiveMetadata { name: "response", block: "defaults", hover: "`response { ... }`\n\nDownstream response mapping/transformation directives.", modes: NO_MODES },
    DirectiveMetadata { name: "error", block: "defaults", hover: "`error { error_map <mode>; }`\n\nNormalize upstream error payloads.", modes: NO_MODES },
    DirectiveMetadata { name: "metrics", block: "defaults", hover: "`metrics { ... }`\n\nToken usage and finish reason extraction rules.", modes: NO_MODES },
    DirectiveMetadata { name: "balance", block: "defaults", hover: "`balance { ... }`\n\nBalance query and extraction directives.", modes: NO_MODES },
    DirectiveMetadata { name: "models", block: "defaults", hover: "`models { ... }`\n\nProvider models list query and mapping directives.", modes: NO_MODES },

    DirectiveMetadata { name: "upstream", block: "match", hover: "`upstream { ... }`\n\nUpstream path/query routing directives.", modes: NO_MODES },
    DirectiveMetadata { name: "auth", block: "match", hover: "`auth { ... }`\n\nAuthentication directives for upstream requests.", modes: NO_MODES },
    DirectiveMetadata { name: "request", block: "match", hover: "`request { ... }`\n\nRequest rewrite/transform directives.", modes: NO_MODES },
    DirectiveMetadata { name: "response", block: "match", hover: "`response { ... }`\n\nDownstream response mapping/transformation directives.", modes: NO_MODES },
    DirectiveMetadata { name: "error", block: "match", hover: "`error { error_map <mode>; }`\n\nNormalize upstream error payloads.", modes: NO_MODES },
    DirectiveMetadata { name: "metrics", block: "match", hover: "`metrics { ... }`\n\nToken usage and finish reason extraction rules.", modes: NO_MODES },

    DirectiveMetadata { name: "base_url", block: "upstream_config", hover: "`base_url = \"https://...\";`\n\nSets provider default upstream base URL.", modes: NO_MODES },
    DirectiveMetadata { name: "set_path", block: "upstream", hover: "`set_path <expr>;`\n\nSets upstream request path.", modes: NO_MODES },
    DirectiveMetadata { name: "set_query", block: "upstream", hover: "`set_query <name> <expr>;`\n\nSets/upserts upstream query parameter.", modes: NO_MODES },
    DirectiveMetadata { name: "del_query", block: "upstream", hover: "`del_query <name>;`\n\nDeletes upstream query parameter.", modes: NO_MODES },

    DirectiveMetadata { name: "auth_bearer", block: "auth", hover: "`auth_bearer;`\n\nSets `Authorization: Bearer <channel.key>`.", modes: NO_MODES },
    DirectiveMetadata { name: "auth_header_key", block: "auth", hover: "`auth_header_key <Header-Name>;`\n\nSets `<Header-Name>: <channel.key>`.", modes: NO_MODES },
    DirectiveMetadata { name: "auth_oauth_bearer", block: "auth", hover: "`auth_oauth_bearer;`\n\nSets `Authorization: Bearer <oauth.access_token>`.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_mode", block: "auth", hover: "`oauth_mode <mode>;`\n\nEnable OAuth token fetch mode for upstream auth.", modes: &["openai", "gemini", "qwen", "claude", "iflow", "antigravity", "kimi", "custom"] },
    DirectiveMetadata { name: "oauth_token_url", block: "auth", hover: "`oauth_token_url <expr>;`\n\nOverrides token endpoint URL (typically with `oauth_mode custom`).", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_client_id", block: "auth", hover: "`oauth_client_id <expr>;`\n\nSets OAuth client id expression for token exchange.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_client_secret", block: "auth", hover: "`oauth_client_secret <expr>;`\n\nSets OAuth client secret expression for token exchange.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_refresh_token", block: "auth", hover: "`oauth_refresh_token <expr>;`\n\nSets OAuth refresh token expression for token exchange.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_scope", block: "auth", hover: "`oauth_scope <expr>;`\n\nSets OAuth scope expression for token exchange.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_audience", block: "auth", hover: "`oauth_audience <expr>;`\n\nSets OAuth audience expression for token exchange.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_method", block: "auth", hover: "`oauth_method GET|POST;`\n\nSets HTTP method for OAuth token request.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_content_type", block: "auth", hover: "`oauth_content_type form|json;`\n\nSets payload encoding for OAuth token request.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_token_path", block: "auth", hover: "`oauth_token_path \"$.path\";`\n\nJSONPath to extract access token from OAuth response.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_expires_in_path", block: "auth", hover: "`oauth_expires_in_path \"$.path\";`\n\nJSONPath to extract `expires_in` from OAuth response.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_token_type_path", block: "auth", hover: "`oauth_token_type_path \"$.path\";`\n\nJSONPath to extract token type from OAuth response.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_timeout_ms", block: "auth", hover: "`oauth_timeout_ms <int>;`\n\nSets timeout in milliseconds for OAuth token request.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_refresh_skew_sec", block: "auth", hover: "`oauth_refresh_skew_sec <int>;`\n\nRefresh token ahead of expiry by this many seconds.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_fallback_ttl_sec", block: "auth", hover: "`oauth_fallback_ttl_sec <int>;`\n\nFallback token TTL when provider does not return expires_in.", modes: NO_MODES },
    DirectiveMetadata { name: "oauth_form", block: "auth", hover: "`oauth_form <key> <expr>;`\n\nAdds one form field to OAuth token request body.", modes: NO_MODES },

    DirectiveMetadata { name: "set_header", block: "request", hover: "`set_header <Header-Name> <expr>;`\n\nSets or overrides one upstream request header.", modes: NO_MODES },
    DirectiveMetadata { name: "del_header", block: "request", hover: "`del_header <Header-Name>;`\n\nDeletes one upstream request header.", modes: NO_MODES },
    DirectiveMetadata { name: "model_map", block: "request", hover: "`model_map <from> <expr>;`\n\nMaps input model name to upstream model expression.", modes: NO_MODES },
    DirectiveMetadata { name: "model_map_default", block: "request", hover: "`model_map_default <expr>;`\n\nFallback mapped model expression when no rule matches.", modes: NO_MODES },
    DirectiveMetadata { name: "json_set", block: "request", hover: "`json_set <jsonpath> <expr>;`\n\nSets one request JSON field value.", modes: NO_MODES },
    DirectiveMetadata { name: "json_set_if_absent", block: "request", hover: "`json_set_if_absent <jsonpath> <expr>;`\n\nSets JSON field only when target field is absent.", modes: NO_MODES },
    DirectiveMetadata { name: "json_del", block: "request", hover: "`json_del <jsonpath>;`\n\nDeletes one request JSON field.", modes: NO_MODES },
    DirectiveMetadata { name: "json_rename", block: "request", hover: "`json_rename <from-jsonpath> <to-jsonpath>;`\n\nRenames/moves one request JSON field.", modes: NO_MODES },
    DirectiveMetadata { name: "req_map", block: "request", hover: "`req_map <mode>;`\n\nMap request JSON between API schemas.", modes: &["openai_chat_to_openai_responses", "openai_chat_to_anthropic_messages", "openai_chat_to_gemini_generate_content", "anthropic_to_openai_chat", "gemini_to_openai_chat"] },

    DirectiveMetadata { name: "resp_passthrough", block: "response", hover: "`resp_passthrough;`\n\nPasses upstream response through without schema mapping.", modes: NO_MODES },
    DirectiveMetadata { name: "resp_map", block: "response", hover: "`resp_map <mode>;`\n\nMap non-stream response JSON.", modes: &["openai_responses_to_openai_chat", "anthropic_to_openai_chat", "gemini_to_openai_chat", "openai_to_anthropic_messages", "openai_to_gemini_chat", "openai_to_gemini_generate_content"] },
    DirectiveMetadata { name: "sse_parse", block: "response", hover: "`sse_parse <mode>;`\n\nMap streaming SSE events/chunks.", modes: &["openai_responses_to_openai_chat_chunks", "anthropic_to_openai_chunks", "openai_to_anthropic_chunks", "openai_to_gemini_chunks", "gemini_to_openai_chat_chunks"] },
    DirectiveMetadata { name: "json_set", block: "response", hover: "`json_set <jsonpath> <expr>;`\n\nSets one downstream response JSON field value (best-effort).", modes: NO_MODES },
    DirectiveMetadata { name: "json_set_if_absent", block: "response", hover: "`json_set_if_absent <jsonpath> <expr>;`\n\nSets response JSON field only when absent (best-effort).", modes: NO_MODES },
    DirectiveMetadata { name: "json_del", block: "response", hover: "`json_del <jsonpath>;`\n\nDeletes one downstream response JSON field (best-effort).", modes: NO_MODES },
    DirectiveMetadata { name: "json_rename", block: "response", hover: "`json_rename <from-jsonpath> <to-jsonpath>;`\n\nRenames/moves one downstream response JSON field (best-effort).", modes: NO_MODES },
    DirectiveMetadata { name: "sse_json_del_if", block: "response", hover: "`sse_json_del_if <cond-jsonpath> <equals-string> <del-jsonpath>;`\n\nFor SSE JSON event payloads, conditionally delete one field.", modes: NO_MODES },

    DirectiveMetadata { name: "error_map", block: "error", hover: "`error_map <mode>;`\n\nNormalize upstream error payload into target error schema.", modes: &["openai", "common", "passthrough"] },

    DirectiveMetadata { name: "usage_extract", block: "metrics", hover: "`usage_extract <mode>;`\n\nExtract usage token fields from response/SSE payload.", modes: &["openai", "anthropic", "gemini", "custom"] },
    DirectiveMetadata { name: "input_tokens", block: "metrics", hover: "`input_tokens = <expr>;`\n\nCustom extraction expression for input/prompt tokens.", modes: NO_MODES },
    DirectiveMetadata { name: "output_tokens", block: "metrics", hover: "`output_tokens = <expr>;`\n\nCustom extraction expression for output/completion tokens.", modes: NO_MODES },
    DirectiveMetadata { name: "cache_read_tokens", block: "metrics", hover: "`cache_read_tokens = <expr>;`\n\nCustom extraction expression for cache read tokens.", modes: NO_MODES },
    DirectiveMetadata { name: "cache_write_tokens", block: "metrics", hover: "`cache_write_tokens = <expr>;`\n\nCustom extraction expression for cache write tokens.", modes: NO_MODES },
    DirectiveMetadata { name: "total_tokens", block: "metrics", hover: "`total_tokens = <expr>;`\n\nCustom extraction expression for total tokens.", modes: NO_MODES },
    DirectiveMetadata { name: "input_tokens_path", block: "metrics", hover: "`input_tokens_path \"$.path\";`\n\nPath override for input token extraction (custom mode).", modes: NO_MODES },
    DirectiveMetadata { name: "output_tokens_path", block: "metrics", hover: "`output_tokens_path \"$.path\";`\n\nPath override for output token extraction (custom mode).", modes: NO_MODES },
    DirectiveMetadata { name: "cache_read_tokens_path", block: "metrics", hover: "`cache_read_tokens_path \"$.path\";`\n\nPath override for cache-read token extraction (custom mode).", modes: NO_MODES },
    DirectiveMetadata { name: "cache_write_tokens_path", block: "metrics", hover: "`cache_write_tokens_path \"$.path\";`\n\nPath override for cache-write token extraction (custom mode).", modes: NO_MODES },
    DirectiveMetadata { name: "finish_reason_extract", block: "metrics", hover: "`finish_reason_extract <mode>;`\n\nExtract finish_reason from response/SSE payload.", modes: &["openai", "anthropic", "gemini", "custom"] },
    DirectiveMetadata { name: "finish_reason_path", block: "metrics", hover: "`finish_reason_path \"$.path\";`\n\nPath override for finish_reason extraction (custom mode).", modes: NO_MODES },

    DirectiveMetadata { name: "balance_mode", block: "balance", hover: "`balance_mode <mode>;`\n\nSelects built-in or custom balance query mode.", modes: &["openai", "custom"] },
    DirectiveMetadata { name: "method", block: "balance", hover: "`method GET|POST;`\n\nHTTP method used by balance query endpoint.", modes: NO_MODES },
    DirectiveMetadata { name: "path", block: "balance", hover: "`path <expr>;`\n\nPath for balance query endpoint (required in custom mode).", modes: NO_MODES },
    DirectiveMetadata { name: "balance_path", block: "balance", hover: "`balance_path \"$.path\";`\n\nJSON path used to read balance amount from response.", modes: NO_MODES },
    DirectiveMetadata { name: "used_path", block: "balance", hover: "`used_path \"$.path\";`\n\nJSON path used to read used amount from response.", modes: NO_MODES },
    DirectiveMetadata { name: "balance_unit", block: "balance", hover: "`balance_unit <unit>;`\n\nBalance currency/unit label (e.g. USD).", modes: NO_MODES },
    DirectiveMetadata { name: "subscription_path", block: "balance", hover: "`subscription_path <path>;`\n\nOptional path to query subscription endpoint.", modes: NO_MODES },
    DirectiveMetadata { name: "usage_path", block: "balance", hover: "`usage_path <path>;`\n\nOptional path to query usage endpoint.", modes: NO_MODES },
    DirectiveMetadata { name: "balance", block: "balance", hover: "`balance = <expr>;`\n\nCustom expression for balance value extraction.", modes: NO_MODES },
    DirectiveMetadata { name: "used", block: "balance", hover: "`used = <expr>;`\n\nCustom expression for used value extraction.", modes: NO_MODES },
    DirectiveMetadata { name: "set_header", block: "balance", hover: "`set_header <Header-Name> <expr>;`\n\nSets header for balance query request.", modes: NO_MODES },
    DirectiveMetadata { name: "del_header", block: "balance", hover: "`del_header <Header-Name>;`\n\nDeletes header for balance query request.", modes: NO_MODES },

    DirectiveMetadata { name: "models_mode", block: "models", hover: "`models_mode <mode>;`\n\nSelects models list query mode.", modes: &["openai", "gemini", "custom"] },
    DirectiveMetadata { name: "method", block: "models", hover: "`method GET|POST;`\n\nHTTP method used by models query endpoint.", modes: NO_MODES },
    DirectiveMetadata { name: "path", block: "models", hover: "`path <expr>;`\n\nPath for models query endpoint.", modes: NO_MODES },
    DirectiveMetadata { name: "id_path", block: "models", hover: "`id_path \"$.path\";`\n\nJSON path to extract model id(s) from models response.", modes: NO_MODES },
    DirectiveMetadata { name: "id_regex", block: "models", hover: "`id_regex \"<regex>\";`\n\nRegex rewrite applied to extracted model ids.", modes: NO_MODES },
    DirectiveMetadata { name: "id_allow_regex", block: "models", hover: "`id_allow_regex \"<regex>\";`\n\nFilter extracted model ids by regex allowlist.", modes: NO_MODES },
    DirectiveMetadata { name: "set_header", block: "models", hover: "`set_header <Header-Name> <expr>;`\n\nSets header for models query request.", modes: NO_MODES },
    DirectiveMetadata { name: "del_header", block: "models", hover: "`del_header <Header-Name>;`\n\nDeletes header for models query request.", modes: NO_MODES },
];

fn normalize_block(s: &str) -> String {
    let v = s.trim().to_lowercase();
    match v.as_str() {
        "_top" => "top".to_string(),
        _ => v,
    }
}

/// Hover markdown for a directive name in one block. Falls back to a
/// name-only match when the block has no entry.
pub fn hover_for_directive(name: &str, block: &str) -> Option<&'static str> {
    let key = name.trim();
    if key.is_empty() {
        return None;
    }
    let b = normalize_block(block);
    DIRECTIVE_METADATA
        .iter()
        .find(|d| d.name == key && normalize_block(d.block) == b && !d.hover.is_empty())
        .or_else(|| DIRECTIVE_METADATA.iter().find(|d| d.name == key && !d.hover.is_empty()))
        .map(|d| d.hover)
}

/// Directive names allowed in one block, deduplicated in table order.
pub fn directives_by_block(block: &str) -> Vec<&'static str> {
    let b = normalize_block(block);
    if b.is_empty() {
        return Vec::new();
    }
    let mut seen = std::collections::HashSet::new();
    DIRECTIVE_METADATA
        .iter()
        .filter(|d| normalize_block(d.block) == b)
        .filter(|d| seen.insert(d.name))
        .map(|d| d.name)
        .collect()
}

/// Allowed mode values for one directive, deduplicated.
pub fn modes_by_directive(name: &str) -> Vec<&'static str> {
    let key = name.trim();
    if key.is_empty() {
        return Vec::new();
    }
    let mut seen = std::collections::HashSet::new();
    DIRECTIVE_METADATA
        .iter()
        .filter(|d| d.name == key)
        .flat_map(|d| d.modes.iter().copied())
        .filter(|m| seen.insert(*m))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hover_prefers_block_match() {
        let req = hover_for_directive("json_set", "request").unwrap();
        assert!(req.contains("request JSON"));
        let resp = hover_for_directive("json_set", "response").unwrap();
        assert!(resp.contains("downstream"));
    }

    #[test]
    fn test_hover_falls_back_across_blocks() {
        // set_header has no "top" entry; name-only fallback applies
        assert!(hover_for_directive("set_header", "top").is_some());
        assert!(hover_for_directive("no_such_directive", "request").is_none());
    }

    #[test]
    fn test_directives_by_block() {
        let metrics = directives_by_block("metrics");
        assert!(metrics.contains(&"usage_extract"));
        assert!(metrics.contains(&"finish_reason_path"));
        assert!(!metrics.contains(&"resp_map"));
    }

    #[test]
    fn test_modes_by_directive() {
        let modes = modes_by_directive("error_map");
        assert_eq!(modes, vec!["openai", "common", "passthrough"]);
        assert!(modes_by_directive("set_header").is_empty());
    }
}
