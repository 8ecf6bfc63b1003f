//! App-name inference from User-Agent strings, for access logging.

struct Rule {
    app: &'static str,
    keywords: &'static [&'static str],
}

static DEFAULT_RULES: &[Rule] = &[
    Rule { app: "claude-code", keywords: &["claude-code", "anthropic-claude-code"] },
    Rule { app: "kilo-code", keywords: &["kilo-code"] },
    Rule { app: "cursor", keywords: &["cursor"] },
    Rule { app: "windsurf", keywords: &["windsurf", "codeium"] },
    Rule { app: "cline", keywords: &["cline"] },
    Rule { app: "roo-code", keywords: &["roo-code", "roo/"] },
    Rule { app: "aider", keywords: &["aider"] },
    Rule { app: "continue", keywords: &["continue"] },
    Rule { app: "openai-sdk", keywords: &["openai-python", "openai-node", "openai-go"] },
    Rule { app: "anthropic-sdk", keywords: &["anthropic-python", "anthropic-sdk"] },
];

/// Infer a normalized app name from a User-Agent string.
pub fn infer(user_agent: &str) -> Option<&'static str> {
    let ua = user_agent.trim().to_lowercase();
    if ua.is_empty() {
        return None;
    }
    for rule in DEFAULT_RULES {
        for kw in rule.keywords {
            if ua.contains(kw) {
                return Some(rule.app);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infers_known_clients() {
        assert_eq!(infer("anthropic-claude-code/1.2"), Some("claude-code"));
        assert_eq!(infer("OpenAI-Python/1.3.5"), Some("openai-sdk"));
        assert_eq!(infer("Mozilla/5.0 Cursor/0.40"), Some("cursor"));
    }

    #[test]
    fn test_unknown_yields_none() {
        assert_eq!(infer(""), None);
        assert_eq!(infer("curl/8.0"), None);
    }
}
