use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use lander_contracts::catalog::FallbackOrder;
use serde::{Deserialize, Serialize};

use crate::prompts::EnrichmentConfig;

/// Settings for one HTTP provider. Unset fields fall back to the client's
/// own defaults, so a config file only names what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub connect_timeout_s: Option<f64>,
    pub read_timeout_s: Option<f64>,
    pub retries: Option<usize>,
    pub retry_backoff_s: Option<f64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            api_key: None,
            model: None,
            connect_timeout_s: None,
            read_timeout_s: None,
            retries: None,
            retry_backoff_s: None,
        }
    }
}

impl ProviderConfig {
    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn timeouts(&self, default_connect_s: f64, default_read_s: f64) -> Timeouts {
        Timeouts {
            connect: seconds(self.connect_timeout_s, default_connect_s, 1.0, 30.0),
            read: seconds(self.read_timeout_s, default_read_s, 5.0, 300.0),
        }
    }

    pub fn retry_policy(&self, default_retries: usize, default_backoff_s: f64) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries.unwrap_or(default_retries).min(5),
            backoff: seconds(self.retry_backoff_s, default_backoff_s, 0.0, 30.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

/// Linear backoff: the n-th retry (0-based) waits `backoff * (n + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: usize,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.backoff.saturating_mul(attempt as u32 + 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub pollinations: ProviderConfig,
    pub huggingface: ProviderConfig,
    pub pexels: ProviderConfig,
    pub pixabay: ProviderConfig,
    pub randomuser: ProviderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    /// RGB distance under which a pixel counts as favicon background.
    pub transparency_threshold: f64,
    /// Minimum luminance for a border colour to be treated as background.
    pub border_min_luminance: f64,
    pub jpeg_quality_ladder: Vec<u8>,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            transparency_threshold: 30.0,
            border_min_luminance: 180.0,
            jpeg_quality_ladder: vec![95, 90, 85, 80, 75, 70, 65, 60, 55, 50, 45],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub providers: ProvidersConfig,
    pub enrichment: EnrichmentConfig,
    pub postprocess: PostProcessConfig,
    pub workers: usize,
    pub fallback_order: FallbackOrder,
    /// Append the local placeholder renderer to every chain.
    pub placeholder: bool,
    /// How long the second pass waits for enriched prompts.
    pub second_pass_wait_s: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            enrichment: EnrichmentConfig::default(),
            postprocess: PostProcessConfig::default(),
            workers: 6,
            fallback_order: FallbackOrder::default(),
            placeholder: false,
            second_pass_wait_s: 20.0,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config JSON in {}", path.display()))
    }

    /// Fills credentials and endpoints from the environment. Values already
    /// set in the config win over the environment.
    pub fn with_env_overrides(mut self) -> Self {
        fill(
            &mut self.providers.pollinations.base_url,
            non_empty_env("POLLINATIONS_API_BASE"),
        );
        fill(
            &mut self.providers.huggingface.api_key,
            non_empty_env("HF_TOKEN").or_else(|| non_empty_env("HUGGINGFACE_API_TOKEN")),
        );
        fill(&mut self.providers.huggingface.model, non_empty_env("HF_MODEL"));
        fill(
            &mut self.providers.pexels.api_key,
            non_empty_env("PEXELS_API_KEY"),
        );
        fill(
            &mut self.providers.pixabay.api_key,
            non_empty_env("PIXABAY_API_KEY"),
        );
        if let Some(url) = non_empty_env("LANDER_OLLAMA_URL") {
            if self.enrichment.base_url == EnrichmentConfig::default().base_url {
                self.enrichment.base_url = url;
            }
        }
        if let Some(model) = non_empty_env("LANDER_OLLAMA_MODEL") {
            if self.enrichment.model == EnrichmentConfig::default().model {
                self.enrichment.model = model;
            }
        }
        self
    }

    pub fn second_pass_wait(&self) -> Duration {
        seconds(Some(self.second_pass_wait_s), 20.0, 0.0, 600.0)
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.as_deref().map(str::trim).unwrap_or_default().is_empty() {
        if let Some(value) = value {
            *slot = Some(value);
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn seconds(value: Option<f64>, default: f64, min: f64, max: f64) -> Duration {
    let raw = value.filter(|value| value.is_finite()).unwrap_or(default);
    Duration::from_secs_f64(raw.clamp(min, max))
}
