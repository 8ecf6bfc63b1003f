//! The self-describing `onr:v1?...` token-key codec.
//!
//! A token-key is a URI-like literal carrying an access key plus optional
//! provider / model / BYOK upstream-key overrides. There is no signature;
//! trust comes from the embedded access key (or, when allowed, from the
//! BYOK upstream key alone).

use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use base64::Engine as _;
use url::form_urlencoded;

pub const TOKEN_KEY_PREFIX: &str = "onr:v1?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenMode {
    #[default]
    Onr,
    Byok,
}

impl TokenMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Onr => "onr",
            Self::Byok => "byok",
        }
    }
}

/// Parsed token-key claims. The embedded access key is returned separately
/// so the caller can re-run the credential checks against it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenClaims {
    pub provider: String,
    pub model_override: String,
    pub upstream_key: String,
    pub mode: TokenMode,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenParseOptions {
    pub allow_byok_without_k: bool,
}

pub fn is_token_key(s: &str) -> bool {
    s.trim().starts_with(TOKEN_KEY_PREFIX)
}

/// Parse an `onr:v1?` token-key. Returns the claims and the embedded access
/// key (empty when a BYOK-only key is allowed).
pub fn parse(token: &str, opts: TokenParseOptions) -> Result<(TokenClaims, String), String> {
    let t = token.trim();
    let Some(query) = t.strip_prefix(TOKEN_KEY_PREFIX) else {
        return Err("not a token key".to_string());
    };

    let mut access_key = String::new();
    let mut saw_k = false;
    let mut saw_k64 = false;
    let mut claims = TokenClaims::default();

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let value = value.trim().to_string();
        match key.as_ref() {
            "k" => {
                if saw_k || saw_k64 {
                    return Err("token key must carry exactly one of k/k64".to_string());
                }
                saw_k = true;
                access_key = value;
            }
            "k64" => {
                if saw_k || saw_k64 {
                    return Err("token key must carry exactly one of k/k64".to_string());
                }
                saw_k64 = true;
                let decoded = B64URL
                    .decode(value.as_bytes())
                    .map_err(|e| format!("invalid k64: {e}"))?;
                access_key = String::from_utf8(decoded).map_err(|_| "invalid k64: not UTF-8")?;
            }
            "p" => claims.provider = value.to_lowercase(),
            "m" => claims.model_override = value,
            "uk" => claims.upstream_key = value,
            _ => {} // unknown params are ignored for forward compatibility
        }
    }

    claims.mode = if claims.upstream_key.is_empty() { TokenMode::Onr } else { TokenMode::Byok };

    if access_key.trim().is_empty() {
        let byok_ok = opts.allow_byok_without_k
            && claims.mode == TokenMode::Byok
            && !claims.upstream_key.trim().is_empty();
        if !byok_ok {
            return Err("token key missing k/k64".to_string());
        }
    }

    Ok((claims, access_key))
}

/// Fields used to build a token-key literal.
#[derive(Debug, Clone, Default)]
pub struct TokenKeyInput {
    pub access_key: String,
    pub provider: String,
    pub model_override: String,
    pub upstream_key: String,
    /// Encode the access key as base64url (`k64`) instead of `k`.
    pub use_k64: bool,
}

/// Build an `onr:v1?` literal. Parsing the result yields the same tuple.
pub fn build(input: &TokenKeyInput) -> String {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    if !input.access_key.is_empty() {
        if input.use_k64 {
            ser.append_pair("k64", &B64URL.encode(input.access_key.as_bytes()));
        } else {
            ser.append_pair("k", &input.access_key);
        }
    }
    if !input.provider.is_empty() {
        ser.append_pair("p", &input.provider);
    }
    if !input.model_override.is_empty() {
        ser.append_pair("m", &input.model_override);
    }
    if !input.upstream_key.is_empty() {
        ser.append_pair("uk", &input.upstream_key);
    }
    format!("{TOKEN_KEY_PREFIX}{}", ser.finish())
}
