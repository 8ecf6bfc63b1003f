//! Pricing resolver: per (provider, model) unit costs with override
//! multipliers.
//!
//! Base prices come from `price.yaml`; `price_overrides.yaml` contributes
//! channel (provider) multipliers and per-model overrides. Unit costs are
//! USD per million tokens unless the file says otherwise.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct RawPriceFile {
    #[serde(default)]
    models: HashMap<String, RawModelPrice>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawModelPrice {
    #[serde(default)]
    input: f64,
    #[serde(default)]
    output: f64,
    #[serde(default)]
    cache_read: f64,
    #[serde(default)]
    cache_write: f64,
    #[serde(default)]
    unit: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawOverridesFile {
    #[serde(default)]
    channel_multipliers: HashMap<String, f64>,
    #[serde(default)]
    model_overrides: HashMap<String, RawModelPrice>,
}

/// Unit costs for one model, after multiplier application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
    /// Cost multiplier that was applied (1.0 when none).
    pub multiplier: f64,
    /// Model id the price row came from.
    pub model: String,
    /// Provider (channel) the multiplier came from, empty when none.
    pub channel: String,
    pub unit: String,
}

/// Computed cost breakdown for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cost {
    pub total: f64,
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

pub struct Resolver {
    base: HashMap<String, RawModelPrice>,
    channel_multipliers: HashMap<String, f64>,
    model_overrides: HashMap<String, RawModelPrice>,
}

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

impl Resolver {
    /// Load pricing data. Missing files yield an empty resolver (pricing
    /// simply resolves nothing); malformed files are errors.
    pub fn load(price_file: &str, overrides_file: &str) -> Result<Self, String> {
        let base = match read_yaml::<RawPriceFile>(price_file)? {
            Some(f) => f.models,
            None => HashMap::new(),
        };
        let overrides = read_yaml::<RawOverridesFile>(overrides_file)?.unwrap_or_default();
        Ok(Self {
            base,
            channel_multipliers: overrides
                .channel_multipliers
                .into_iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v))
                .collect(),
            model_overrides: overrides.model_overrides,
        })
    }

    pub fn empty() -> Self {
        Self {
            base: HashMap::new(),
            channel_multipliers: HashMap::new(),
            model_overrides: HashMap::new(),
        }
    }

    /// Resolve unit costs for (provider, model). Model overrides beat base
    /// prices; the provider multiplier applies on top.
    pub fn resolve(&self, provider: &str, model: &str) -> Option<ModelPrice> {
        let model = model.trim();
        if model.is_empty() {
            return None;
        }
        let row = self.model_overrides.get(model).or_else(|| self.base.get(model))?;
        let provider = provider.trim().to_lowercase();
        let multiplier = self.channel_multipliers.get(&provider).copied().unwrap_or(1.0);
        Some(ModelPrice {
            input: row.input * multiplier,
            output: row.output * multiplier,
            cache_read: row.cache_read * multiplier,
            cache_write: row.cache_write * multiplier,
            multiplier,
            model: model.to_string(),
            channel: if multiplier == 1.0 && !self.channel_multipliers.contains_key(&provider) {
                String::new()
            } else {
                provider
            },
            unit: if row.unit.trim().is_empty() { "USD".to_string() } else { row.unit.clone() },
        })
    }

    /// Compute the cost of one request from token counts.
    pub fn cost(
        &self,
        provider: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        cache_read_tokens: i64,
        cache_write_tokens: i64,
    ) -> Option<(ModelPrice, Cost)> {
        let price = self.resolve(provider, model)?;
        let per = |tokens: i64, unit_cost: f64| (tokens.max(0) as f64) / TOKENS_PER_UNIT * unit_cost;
        let input = per(input_tokens, price.input);
        let output = per(output_tokens, price.output);
        let cache_read = per(cache_read_tokens, price.cache_read);
        let cache_write = per(cache_write_tokens, price.cache_write);
        let cost = Cost {
            total: input + output + cache_read + cache_write,
            input,
            output,
            cache_read,
            cache_write,
        };
        Some((price, cost))
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &str) -> Result<Option<T>, String> {
    let p = path.trim();
    if p.is_empty() || !std::path::Path::new(p).exists() {
        return Ok(None);
    }
    let bytes = std::fs::read_to_string(p).map_err(|e| format!("read pricing file {p:?}: {e}"))?;
    serde_yaml::from_str(&bytes)
        .map(Some)
        .map_err(|e| format!("parse pricing file {p:?}: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn resolver(price: &str, overrides: &str) -> Resolver {
        let dir = tempfile::tempdir().unwrap();
        let pf = dir.path().join("price.yaml");
        let of = dir.path().join("price_overrides.yaml");
        std::fs::write(&pf, price).unwrap();
        std::fs::write(&of, overrides).unwrap();
        Resolver::load(&pf.to_string_lossy(), &of.to_string_lossy()).unwrap()
    }

    #[test]
    fn test_resolve_base_price() {
        let r = resolver(
            "models:\n  gpt-4o:\n    input: 2.5\n    output: 10.0\n",
            "",
        );
        let p = r.resolve("openai", "gpt-4o").unwrap();
        assert_eq!(p.input, 2.5);
        assert_eq!(p.output, 10.0);
        assert_eq!(p.multiplier, 1.0);
        assert_eq!(p.unit, "USD");
        assert!(r.resolve("openai", "unknown").is_none());
    }

    #[test]
    fn test_channel_multiplier_applies() {
        let r = resolver(
            "models:\n  gpt-4o:\n    input: 2.0\n    output: 8.0\n",
            "channel_multipliers:\n  azure: 1.5\n",
        );
        let p = r.resolve("azure", "gpt-4o").unwrap();
        assert_eq!(p.input, 3.0);
        assert_eq!(p.output, 12.0);
        assert_eq!(p.multiplier, 1.5);
        assert_eq!(p.channel, "azure");
    }

    #[test]
    fn test_model_override_beats_base() {
        let r = resolver(
            "models:\n  gpt-4o:\n    input: 2.0\n    output: 8.0\n",
            "model_overrides:\n  gpt-4o:\n    input: 1.0\n    output: 4.0\n",
        );
        let p = r.resolve("openai", "gpt-4o").unwrap();
        assert_eq!(p.input, 1.0);
        assert_eq!(p.output, 4.0);
    }

    #[test]
    fn test_cost_per_million_tokens() {
        let r = resolver(
            "models:\n  gpt-4o-mini:\n    input: 0.15\n    output: 0.6\n",
            "",
        );
        let (_, cost) = r.cost("openai", "gpt-4o-mini", 1_000_000, 500_000, 0, 0).unwrap();
        assert!((cost.input - 0.15).abs() < 1e-9);
        assert!((cost.output - 0.3).abs() < 1e-9);
        assert!((cost.total - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_missing_files_resolve_nothing() {
        let r = Resolver::load("/nonexistent/price.yaml", "/nonexistent/over.yaml").unwrap();
        assert!(r.resolve("openai", "gpt-4o").is_none());
    }
}
