use std::time::Duration;

use lander_contracts::slots::ImageSlot;
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Runtime tuning for the local Ollama-compatible enrichment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub connect_timeout_s: f64,
    pub timeout_s: f64,
    pub num_ctx: u32,
    pub num_thread: Option<u32>,
    pub temperature: f64,
    pub keep_alive: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            connect_timeout_s: 3.0,
            timeout_s: 45.0,
            num_ctx: 2048,
            num_thread: None,
            temperature: 0.7,
            keep_alive: "5m".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentClient {
    config: EnrichmentConfig,
    http: HttpClient,
}

impl EnrichmentClient {
    /// Returns `None` when enrichment is disabled or no HTTP client can be built.
    pub fn new(config: EnrichmentConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs_f64(
                config.connect_timeout_s.clamp(0.5, 30.0),
            ))
            .timeout(Duration::from_secs_f64(config.timeout_s.clamp(1.0, 300.0)))
            .build()
            .ok()?;
        Some(Self { config, http })
    }

    pub fn config(&self) -> &EnrichmentConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/api/generate",
            self.config.base_url.trim().trim_end_matches('/')
        )
    }

    pub(crate) fn request_body(&self, theme: &str, slot: ImageSlot, template: &str) -> Value {
        let instruction = format!(
            "Rewrite the image-generation prompt below for the '{slot}' image of a landing page \
             for this business: {theme}. Keep every constraint it states, add concrete visual \
             detail, write it in English, and reply with the prompt only in at most {} characters.\n\n{template}",
            slot.prompt_budget()
        );
        let mut options = json!({
            "num_ctx": self.config.num_ctx,
            "temperature": self.config.temperature,
        });
        if let (Some(threads), Some(map)) = (self.config.num_thread, options.as_object_mut()) {
            map.insert("num_thread".to_string(), json!(threads));
        }
        json!({
            "model": self.config.model,
            "prompt": instruction,
            "stream": false,
            "keep_alive": self.config.keep_alive,
            "options": options,
        })
    }

    /// Best-effort rewrite of `template`. Any failure yields `None` so the
    /// caller keeps the template.
    pub fn enrich(&self, theme: &str, slot: ImageSlot, template: &str) -> Option<String> {
        let response = self
            .http
            .post(self.endpoint())
            .json(&self.request_body(theme, slot, template))
            .send()
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let payload: Value = response.json().ok()?;
        extract_enriched_text(&payload)
    }
}

pub(crate) fn extract_enriched_text(payload: &Value) -> Option<String> {
    let raw = payload.get("response").and_then(Value::as_str)?;
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```") {
        text = stripped
            .trim_start_matches(|ch: char| ch.is_alphanumeric())
            .trim_end_matches("```")
            .trim();
    }
    let text = text
        .trim_matches(|ch: char| matches!(ch, '"' | '\'' | '“' | '”'))
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ");
    if text.is_empty() {
        return None;
    }
    Some(text)
}
