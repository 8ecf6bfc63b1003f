//! Upstream HTTP client.
//!
//! One shared connection pool plus optional per-provider proxied clients,
//! rebuilt at startup and on reload from `upstream_proxies.by_provider`.
//! Unary requests carry an overall timeout equal to the write timeout;
//! streaming requests disable it once the response starts flowing.

use crate::proxy::executor::PreparedRequest;
use onr_types::ProxyError;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub struct UpstreamClient {
    base: Client,
    proxied: RwLock<Arc<HashMap<String, Client>>>,
    write_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(write_timeout: Duration) -> Result<Self, ProxyError> {
        let base = builder().build().map_err(|e| ProxyError::Internal {
            message: format!("build http client: {e}"),
        })?;
        Ok(Self { base, proxied: RwLock::new(Arc::new(HashMap::new())), write_timeout })
    }

    /// Rebuild the per-provider proxy clients. Invalid proxy URLs are
    /// logged and skipped; those providers fall back to the direct client.
    pub fn set_proxies(&self, by_provider: &HashMap<String, String>) {
        let mut map = HashMap::with_capacity(by_provider.len());
        for (provider, url) in by_provider {
            let provider = provider.trim().to_lowercase();
            let url = url.trim();
            if provider.is_empty() || url.is_empty() {
                continue;
            }
            let proxy = match reqwest::Proxy::all(url) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(provider = %provider, proxy = %url, error = %e, "invalid upstream proxy url, skipping");
                    continue;
                }
            };
            match builder().proxy(proxy).build() {
                Ok(client) => {
                    map.insert(provider, client);
                }
                Err(e) => {
                    tracing::warn!(provider = %provider, error = %e, "failed to build proxied client, skipping");
                }
            }
        }
        let mut guard = self.proxied.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(map);
    }

    fn client_for(&self, provider: &str) -> Client {
        let snapshot = self.proxied.read().unwrap_or_else(|e| e.into_inner()).clone();
        snapshot.get(&provider.trim().to_lowercase()).cloned().unwrap_or_else(|| self.base.clone())
    }

    /// Send one prepared request. Errors before response headers map to
    /// `UpstreamConnect` (the only retryable kind).
    pub async fn send(
        &self,
        provider: &str,
        prepared: &PreparedRequest,
        is_stream: bool,
    ) -> Result<reqwest::Response, ProxyError> {
        let client = self.client_for(provider);
        let mut req = client.post(&prepared.url).body(prepared.body.clone());
        for (name, value) in &prepared.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if !prepared.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-type")) {
            req = req.header("Content-Type", "application/json");
        }
        if !is_stream {
            req = req.timeout(self.write_timeout);
        }

        req.send().await.map_err(|e| ProxyError::UpstreamConnect {
            provider: provider.to_string(),
            message: e.to_string(),
        })
    }

    /// Bodyless GET/POST against an absolute URL, for balance/models admin
    /// queries. Anything other than POST runs as GET.
    pub async fn fetch(
        &self,
        provider: &str,
        method: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<reqwest::Response, ProxyError> {
        let client = self.client_for(provider);
        let method = if method.trim().eq_ignore_ascii_case("POST") {
            reqwest::Method::POST
        } else {
            reqwest::Method::GET
        };
        let mut req = client.request(method, url).timeout(self.write_timeout);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req.send().await.map_err(|e| ProxyError::UpstreamConnect {
            provider: provider.to_string(),
            message: e.to_string(),
        })
    }

    /// [`fetch`] plus status check and body read: non-2xx maps to
    /// `UpstreamHttp`.
    pub async fn fetch_ok_body(
        &self,
        provider: &str,
        method: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Vec<u8>, ProxyError> {
        let resp = self.fetch(provider, method, url, headers).await?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| ProxyError::Internal {
            message: format!("read upstream body: {e}"),
        })?;
        if !status.is_success() {
            return Err(ProxyError::UpstreamHttp {
                provider: provider.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(body.to_vec())
    }
}

fn builder() -> reqwest::ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(20))
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_map_normalizes_and_skips_invalid() {
        let client = UpstreamClient::new(Duration::from_secs(30)).unwrap();
        let mut map = HashMap::new();
        map.insert(" OpenAI ".to_string(), "http://127.0.0.1:7890".to_string());
        map.insert("bad".to_string(), "not a proxy url".to_string());
        map.insert("empty".to_string(), String::new());
        client.set_proxies(&map);

        let snapshot = client.proxied.read().unwrap().clone();
        assert!(snapshot.contains_key("openai"));
        assert!(!snapshot.contains_key("bad"));
        assert!(!snapshot.contains_key("empty"));
    }

    #[tokio::test]
    async fn test_fetch_connect_error_surfaces() {
        let client = UpstreamClient::new(Duration::from_secs(1)).unwrap();
        // unroutable per RFC 5737
        let err = client
            .fetch("openai", "GET", "http://192.0.2.1:9/v1/models", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamConnect { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_connect_error_is_retryable() {
        let client = UpstreamClient::new(Duration::from_secs(1)).unwrap();
        let prepared = PreparedRequest {
            // unroutable per RFC 5737
            url: "http://192.0.2.1:9/v1/chat/completions".to_string(),
            headers: Vec::new(),
            body: b"{}".to_vec(),
        };
        let err = client.send("openai", &prepared, false).await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
