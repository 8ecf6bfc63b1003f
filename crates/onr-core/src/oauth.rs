//! OAuth token acquisition and caching.
//!
//! Cache key = `sha256(access_key) | provider | resolved identity`. Each key
//! gets at most one in-flight token exchange (per-key singleflight); other
//! callers wait for that result. Entries optionally persist to disk as
//! `<dir>/<urlencoded-cache-key>.json` via write-temp + rename.

use crate::jsonutil;
use dashmap::DashMap;
use onr_types::ProxyError;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REFRESH_SKEW_SEC: u64 = 60;
const DEFAULT_FALLBACK_TTL_SEC: u64 = 3600;

/// Everything needed to perform one token exchange.
#[derive(Debug, Clone, Default)]
pub struct AcquireInput {
    pub cache_key: String,
    pub token_url: String,
    /// GET or POST; POST when empty.
    pub method: String,
    /// `form` or `json`; form when empty.
    pub content_type: String,
    pub form: Vec<(String, String)>,
    /// (username, password) for Basic auth; applied when username non-empty.
    pub basic_auth: Option<(String, String)>,
    pub token_path: String,
    pub expires_in_path: String,
    pub token_type_path: String,
    pub timeout_ms: Option<u64>,
    pub refresh_skew_sec: Option<u64>,
    pub fallback_ttl_sec: Option<u64>,
}

/// A cached access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenInfo {
    pub access_token: String,
    pub token_type: String,
    pub expires_at_unix: i64,
}

pub struct OAuthClient {
    http: reqwest::Client,
    cache: DashMap<String, TokenInfo>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    persist_enabled: bool,
    persist_dir: PathBuf,
}

/// Compose the cache key for one (access key, provider, identity) triple.
pub fn cache_key(access_key: &str, provider: &str, identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(access_key.as_bytes());
    let digest = hasher.finalize();
    format!("{:x}|{}|{}", digest, provider.trim().to_lowercase(), identity.trim())
}

impl OAuthClient {
    pub fn new(persist_enabled: bool, persist_dir: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: DashMap::new(),
            locks: DashMap::new(),
            persist_enabled,
            persist_dir: PathBuf::from(persist_dir),
        }
    }

    /// Acquire a token: live cache hit, else singleflight exchange.
    pub async fn acquire(&self, input: &AcquireInput) -> Result<TokenInfo, ProxyError> {
        let http = self.http.clone();
        let exchange_input = input.clone();
        self.acquire_with(input, move || exchange(http, exchange_input)).await
    }

    /// Same as [`acquire`] with an injectable exchange, for tests.
    pub async fn acquire_with<F, Fut>(
        &self,
        input: &AcquireInput,
        exchange_fn: F,
    ) -> Result<TokenInfo, ProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenInfo, ProxyError>>,
    {
        let skew = input.refresh_skew_sec.unwrap_or(DEFAULT_REFRESH_SKEW_SEC) as i64;
        let now = chrono::Utc::now().timestamp();

        if let Some(hit) = self.live_entry(&input.cache_key, now, skew) {
            return Ok(hit);
        }

        let lock = self
            .locks
            .entry(input.cache_key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // another caller may have refreshed while we waited for the slot
        let now = chrono::Utc::now().timestamp();
        if let Some(hit) = self.live_entry(&input.cache_key, now, skew) {
            return Ok(hit);
        }
        if let Some(hit) = self.load_persisted(&input.cache_key, now, skew) {
            self.cache.insert(input.cache_key.clone(), hit.clone());
            return Ok(hit);
        }

        let info = exchange_fn().await?;
        self.cache.insert(input.cache_key.clone(), info.clone());
        if self.persist_enabled {
            if let Err(e) = self.persist(&input.cache_key, &info) {
                tracing::warn!(error = %e, "failed to persist oauth token");
            }
        }
        Ok(info)
    }

    fn live_entry(&self, key: &str, now: i64, skew: i64) -> Option<TokenInfo> {
        let entry = self.cache.get(key)?;
        if now + skew < entry.expires_at_unix {
            Some(entry.clone())
        } else {
            None
        }
    }

    fn persist_path(&self, key: &str) -> PathBuf {
        let name = utf8_percent_encode(key, NON_ALPHANUMERIC).to_string();
        self.persist_dir.join(format!("{name}.json"))
    }

    fn load_persisted(&self, key: &str, now: i64, skew: i64) -> Option<TokenInfo> {
        if !self.persist_enabled {
            return None;
        }
        let bytes = std::fs::read_to_string(self.persist_path(key)).ok()?;
        let info: TokenInfo = serde_json::from_str(&bytes).ok()?;
        if now + skew < info.expires_at_unix {
            Some(info)
        } else {
            None
        }
    }

    fn persist(&self, key: &str, info: &TokenInfo) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.persist_dir)?;
        let path = self.persist_path(key);
        let tmp = path.with_file_name(format!(
            "{}.tmp",
            path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
        ));
        std::fs::write(&tmp, serde_json::to_vec(info)?)?;
        match std::fs::rename(&tmp, &path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                Err(e)
            }
        }
    }
}

async fn exchange(http: reqwest::Client, input: AcquireInput) -> Result<TokenInfo, ProxyError> {
    let timeout = Duration::from_millis(input.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
    let method = if input.method.trim().eq_ignore_ascii_case("GET") {
        reqwest::Method::GET
    } else {
        reqwest::Method::POST
    };

    let mut req = http.request(method, &input.token_url).timeout(timeout);
    if let Some((user, pass)) = &input.basic_auth {
        if !user.is_empty() {
            req = req.basic_auth(user, Some(pass));
        }
    }
    req = if input.content_type.trim().eq_ignore_ascii_case("json") {
        let body: serde_json::Map<String, serde_json::Value> = input
            .form
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        req.json(&body)
    } else {
        let form: Vec<(&str, &str)> =
            input.form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        req.form(&form)
    };

    let resp = req.send().await.map_err(|e| ProxyError::OAuthAcquire {
        message: format!("token request failed: {e}"),
    })?;
    let status = resp.status();
    let body = resp.bytes().await.map_err(|e| ProxyError::OAuthAcquire {
        message: format!("read token response: {e}"),
    })?;
    if !status.is_success() {
        return Err(ProxyError::OAuthAcquire {
            message: format!("upstream status {}", status.as_u16()),
        });
    }

    let root: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        ProxyError::OAuthAcquire { message: format!("decode token response: {e}") }
    })?;

    let token_path =
        if input.token_path.trim().is_empty() { "$.access_token" } else { input.token_path.trim() };
    let access_token = jsonutil::get_string(&root, token_path);
    if access_token.is_empty() {
        return Err(ProxyError::OAuthAcquire {
            message: format!("no access token at {token_path:?}"),
        });
    }

    let expires_in_path = if input.expires_in_path.trim().is_empty() {
        "$.expires_in"
    } else {
        input.expires_in_path.trim()
    };
    let expires_in = jsonutil::get_int(&root, expires_in_path);
    let ttl = if expires_in > 0 {
        expires_in
    } else {
        input.fallback_ttl_sec.unwrap_or(DEFAULT_FALLBACK_TTL_SEC) as i64
    };

    let token_type = if input.token_type_path.trim().is_empty() {
        jsonutil::get_string(&root, "$.token_type")
    } else {
        jsonutil::get_string(&root, input.token_type_path.trim())
    };

    Ok(TokenInfo {
        access_token,
        token_type: if token_type.is_empty() { "Bearer".to_string() } else { token_type },
        expires_at_unix: chrono::Utc::now().timestamp() + ttl,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn input(key: &str, skew: u64) -> AcquireInput {
        AcquireInput {
            cache_key: key.to_string(),
            token_url: "https://auth.example.com/token".to_string(),
            refresh_skew_sec: Some(skew),
            ..AcquireInput::default()
        }
    }

    fn token(expires_in: i64) -> TokenInfo {
        TokenInfo {
            access_token: "tok".to_string(),
            token_type: "Bearer".to_string(),
            expires_at_unix: chrono::Utc::now().timestamp() + expires_in,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_exchange() {
        let client = OAuthClient::new(false, "");
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let got = client
                .acquire_with(&input("k1", 30), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(token(600))
                })
                .await
                .unwrap();
            assert_eq!(got.access_token, "tok");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_skew_forces_new_exchange() {
        let client = OAuthClient::new(false, "");
        // expires in 25s with a 30s skew: entry is not live
        client.cache.insert("k2".to_string(), token(25));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        client
            .acquire_with(&input("k2", 30), move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(token(600))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_singleflight_one_exchange_for_concurrent_callers() {
        let client = Arc::new(OAuthClient::new(false, ""));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                client
                    .acquire_with(&input("k3", 30), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(token(600))
                    })
                    .await
                    .unwrap()
            }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap().access_token, "tok");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_string_lossy().into_owned();
        let client = OAuthClient::new(true, &dir_str);
        client
            .acquire_with(&input("team|openai|id", 30), || async { Ok(token(600)) })
            .await
            .unwrap();

        // fresh client instance finds the persisted entry, no exchange
        let client2 = OAuthClient::new(true, &dir_str);
        let got = client2
            .acquire_with(&input("team|openai|id", 30), || async {
                Err(ProxyError::OAuthAcquire { message: "should not exchange".to_string() })
            })
            .await
            .unwrap();
        assert_eq!(got.access_token, "tok");
    }

    #[tokio::test]
    async fn test_exchange_error_propagates() {
        let client = OAuthClient::new(false, "");
        let err = client
            .acquire_with(&input("k4", 30), || async {
                Err(ProxyError::OAuthAcquire { message: "upstream status 500".to_string() })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::OAuthAcquire { .. }));
    }

    #[test]
    fn test_cache_key_shape() {
        let k = cache_key("ak-1", " OpenAI ", "main");
        assert!(k.contains("|openai|main"));
        assert_ne!(cache_key("ak-1", "openai", "main"), cache_key("ak-2", "openai", "main"));
    }
}
