//! Upstream key and access-key store.
//!
//! Loads `keys.yaml`, decrypts `ENC[v1:aesgcm:<b64(nonce||ct||tag)>]`
//! values with the master key from `ONR_MASTER_KEY`, applies
//! `ONR_UPSTREAM_KEY_*` / `ONR_ACCESS_KEY_*` env overrides, and exposes
//! round-robin upstream key rotation plus constant-time access-key matching.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use onr_types::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use subtle::ConstantTimeEq;

const ENC_PREFIX: &str = "ENC[v1:aesgcm:";
const ENC_SUFFIX: &str = "]";
const NONCE_LEN: usize = 12;

/// One provider-facing credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamKey {
    pub name: String,
    pub value: String,
    pub base_url_override: String,
}

/// One client-facing credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessKey {
    pub name: String,
    pub value: String,
    pub disabled: bool,
    pub comment: String,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    providers: HashMap<String, RawProvider>,
    #[serde(default)]
    access_keys: Vec<RawAccessKey>,
}

#[derive(Debug, Deserialize)]
struct RawProvider {
    #[serde(default)]
    keys: Vec<RawUpstreamKey>,
}

#[derive(Debug, Deserialize)]
struct RawUpstreamKey {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    base_url_override: String,
}

#[derive(Debug, Deserialize)]
struct RawAccessKey {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    comment: String,
}

/// Immutable key store snapshot plus per-provider rotation counters.
pub struct Store {
    providers: HashMap<String, Vec<UpstreamKey>>,
    access_keys: Vec<AccessKey>,
    counters: HashMap<String, AtomicUsize>,
}

impl Store {
    /// Load and decrypt the keys file, then apply env overrides. Fails when
    /// the file yields neither upstream keys nor access keys.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let bytes = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        let raw: RawFile = serde_yaml::from_str(&bytes).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        let mut providers: HashMap<String, Vec<UpstreamKey>> = HashMap::new();
        for (name, prov) in raw.providers {
            let provider = normalize_provider(&name);
            if provider.is_empty() {
                continue;
            }
            let mut keys = Vec::with_capacity(prov.keys.len());
            for (i, k) in prov.keys.into_iter().enumerate() {
                let mut value = k.value;
                if let Some(env) = std::env::var(env_var_for_upstream_key(&provider, &k.name, i))
                    .ok()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                {
                    value = env;
                }
                keys.push(UpstreamKey {
                    name: k.name.trim().to_string(),
                    value: decrypt_if_needed(&value)?,
                    base_url_override: k.base_url_override.trim().to_string(),
                });
            }
            if !keys.is_empty() {
                providers.insert(provider, keys);
            }
        }

        let mut access_keys = Vec::with_capacity(raw.access_keys.len());
        for (i, ak) in raw.access_keys.into_iter().enumerate() {
            let mut value = ak.value;
            if let Some(env) = std::env::var(env_var_for_access_key(&ak.name, i))
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
            {
                value = env;
            }
            access_keys.push(AccessKey {
                name: ak.name.trim().to_string(),
                value: decrypt_if_needed(&value)?,
                disabled: ak.disabled,
                comment: ak.comment,
            });
        }

        if providers.is_empty() && access_keys.is_empty() {
            return Err(ConfigError::Invalid {
                message: format!("keys file {path:?} defines no upstream keys or access keys"),
            });
        }

        let counters = providers.keys().map(|k| (k.clone(), AtomicUsize::new(0))).collect();
        Ok(Self { providers, access_keys, counters })
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.providers.contains_key(&normalize_provider(provider))
    }

    /// Next upstream key for a provider, rotating round-robin. The counter
    /// is a per-provider atomic; concurrent callers never observe the same
    /// index twice in sequence.
    pub fn next_key(&self, provider: &str) -> Option<UpstreamKey> {
        let provider = normalize_provider(provider);
        let keys = self.providers.get(&provider)?;
        if keys.is_empty() {
            return None;
        }
        let counter = self.counters.get(&provider)?;
        let idx = counter.fetch_add(1, Ordering::AcqRel) % keys.len();
        Some(keys[idx].clone())
    }

    /// All access keys, copied.
    pub fn access_keys(&self) -> Vec<AccessKey> {
        self.access_keys.clone()
    }

    /// Constant-time match against the non-disabled access keys. Returns the
    /// matching key's name.
    pub fn match_access_key(&self, candidate: &str) -> Option<(String, bool)> {
        let cand = candidate.as_bytes();
        let mut found: Option<String> = None;
        // scan the full list regardless of where the hit lands
        for ak in &self.access_keys {
            if ak.disabled || ak.value.is_empty() {
                continue;
            }
            let hit: bool = ak.value.as_bytes().ct_eq(cand).into();
            if hit && found.is_none() {
                found = Some(ak.name.clone());
            }
        }
        found.map(|name| (name, true))
    }
}

pub fn normalize_provider(name: &str) -> String {
    name.trim().to_lowercase()
}

fn sanitize_env_token(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' { c } else { '_' })
        .collect()
}

fn env_var_for_upstream_key(provider: &str, name: &str, index: usize) -> String {
    let prov = sanitize_env_token(&provider.trim().to_uppercase());
    let n = name.trim();
    if n.is_empty() {
        format!("ONR_UPSTREAM_KEY_{}_{}", prov, index + 1)
    } else {
        format!("ONR_UPSTREAM_KEY_{}_{}", prov, sanitize_env_token(&n.to_uppercase()))
    }
}

fn env_var_for_access_key(name: &str, index: usize) -> String {
    let n = name.trim();
    if n.is_empty() {
        format!("ONR_ACCESS_KEY_{}", index + 1)
    } else {
        format!("ONR_ACCESS_KEY_{}", sanitize_env_token(&n.to_uppercase()))
    }
}

/// Master key from `ONR_MASTER_KEY`: raw 32 bytes, or base64 of 32 bytes.
fn load_master_key() -> Result<Vec<u8>, ConfigError> {
    let raw = std::env::var("ONR_MASTER_KEY").unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::MasterKey {
            message: "ONR_MASTER_KEY is required for encrypted values".to_string(),
        });
    }
    if raw.len() == 32 {
        return Ok(raw.as_bytes().to_vec());
    }
    if let Ok(decoded) = B64.decode(raw) {
        if decoded.len() == 32 {
            return Ok(decoded);
        }
    }
    Err(ConfigError::MasterKey {
        message: "ONR_MASTER_KEY must be 32 raw bytes or base64 of 32 bytes".to_string(),
    })
}

/// Encrypt a plaintext into `ENC[v1:aesgcm:...]` form using the master key.
pub fn encrypt(plaintext: &str) -> Result<String, ConfigError> {
    let key_bytes = load_master_key()?;
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ct = cipher.encrypt(&nonce, plaintext.as_bytes()).map_err(|e| ConfigError::MasterKey {
        message: format!("encrypt failed: {e}"),
    })?;
    let mut buf = nonce.to_vec();
    buf.extend_from_slice(&ct);
    Ok(format!("{ENC_PREFIX}{}{ENC_SUFFIX}", B64.encode(buf)))
}

/// Decrypt `ENC[v1:aesgcm:...]` values; anything else passes through.
pub fn decrypt_if_needed(value: &str) -> Result<String, ConfigError> {
    let v = value.trim();
    let Some(inner) = v.strip_prefix(ENC_PREFIX).and_then(|s| s.strip_suffix(ENC_SUFFIX)) else {
        return Ok(value.to_string());
    };
    let blob = B64.decode(inner).map_err(|e| ConfigError::MasterKey {
        message: format!("invalid base64 in encrypted value: {e}"),
    })?;
    if blob.len() <= NONCE_LEN {
        return Err(ConfigError::MasterKey {
            message: "encrypted value too short".to_string(),
        });
    }
    let key_bytes = load_master_key()?;
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    let pt = cipher.decrypt(nonce, &blob[NONCE_LEN..]).map_err(|_| ConfigError::MasterKey {
        message: "decrypt failed (wrong master key or corrupted value)".to_string(),
    })?;
    String::from_utf8(pt).map_err(|_| ConfigError::MasterKey {
        message: "decrypted value is not valid UTF-8".to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_keys(content: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        let p = path.to_string_lossy().into_owned();
        (dir, p)
    }

    #[test]
    fn test_rotation_and_accessors() {
        let (_dir, path) = write_keys(
            r#"
providers:
  openai:
    keys:
      - name: "k1"
        value: "v1"
      - name: "k2"
        value: "v2"
access_keys:
  - name: "client-a"
    value: "ak-1"
"#,
        );
        let st = Store::load(&path).unwrap();
        assert!(st.has_provider(" OPENAI "));
        assert!(!st.has_provider("unknown"));

        assert_eq!(st.next_key("openai").unwrap().value, "v1");
        assert_eq!(st.next_key("openai").unwrap().value, "v2");
        assert_eq!(st.next_key("openai").unwrap().value, "v1");
        assert!(st.next_key("none").is_none());

        let aks = st.access_keys();
        assert_eq!(aks.len(), 1);
        assert_eq!(aks[0].name, "client-a");

        assert_eq!(st.match_access_key("ak-1"), Some(("client-a".to_string(), true)));
        assert_eq!(st.match_access_key("ak-1x"), None);
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let (_dir, path) = write_keys("providers: {}\n");
        assert!(Store::load(&path).is_err());
    }

    #[test]
    fn test_disabled_access_keys_do_not_match() {
        let (_dir, path) = write_keys(
            r#"
access_keys:
  - name: "client-a"
    value: "ak-1"
    disabled: true
"#,
        );
        let st = Store::load(&path).unwrap();
        assert_eq!(st.match_access_key("ak-1"), None);
    }

    #[test]
    fn test_env_helpers() {
        assert_eq!(normalize_provider(" OpenAI "), "openai");
        assert_eq!(env_var_for_upstream_key("openai", "main-key", 0), "ONR_UPSTREAM_KEY_OPENAI_MAIN_KEY");
        assert_eq!(env_var_for_upstream_key("openai", "", 1), "ONR_UPSTREAM_KEY_OPENAI_2");
        assert_eq!(env_var_for_access_key("team-a", 0), "ONR_ACCESS_KEY_TEAM_A");
        assert_eq!(env_var_for_access_key("", 1), "ONR_ACCESS_KEY_2");
        assert_eq!(sanitize_env_token("A-b.c"), "A____");
    }

    // ONR_MASTER_KEY is process-global; serialize the tests that touch it.
    static MASTER_KEY_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let _guard = MASTER_KEY_LOCK.lock().unwrap();
        std::env::set_var("ONR_MASTER_KEY", "12345678901234567890123456789012");
        let enc = encrypt("hello").unwrap();
        assert!(enc.starts_with("ENC[v1:aesgcm:"));
        assert_eq!(decrypt_if_needed(&enc).unwrap(), "hello");
        assert_eq!(decrypt_if_needed("plain").unwrap(), "plain");
        std::env::remove_var("ONR_MASTER_KEY");
    }

    #[test]
    fn test_decrypt_errors() {
        let _guard = MASTER_KEY_LOCK.lock().unwrap();
        std::env::set_var("ONR_MASTER_KEY", "12345678901234567890123456789012");
        assert!(decrypt_if_needed("ENC[v1:aesgcm:AA=A]").is_err());
        let short = format!("ENC[v1:aesgcm:{}]", B64.encode([1u8, 2, 3]));
        assert!(decrypt_if_needed(&short).is_err());
        std::env::remove_var("ONR_MASTER_KEY");
    }

    #[test]
    fn test_master_key_shapes() {
        let _guard = MASTER_KEY_LOCK.lock().unwrap();
        std::env::set_var("ONR_MASTER_KEY", "");
        assert!(load_master_key().is_err());
        std::env::set_var("ONR_MASTER_KEY", "short");
        assert!(load_master_key().is_err());
        let raw = b"12345678901234567890123456789012";
        std::env::set_var("ONR_MASTER_KEY", B64.encode(raw));
        assert_eq!(load_master_key().unwrap(), raw.to_vec());
        std::env::remove_var("ONR_MASTER_KEY");
    }
}
