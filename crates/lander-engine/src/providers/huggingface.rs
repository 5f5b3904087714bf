use lander_contracts::slots::ImageSlot;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};

use super::http::{build_http_client, ensure_image, image_from_json, read_json, send_with_retries};
use super::{seed_for, ImageProvider, ProviderImage};
use crate::config::{ProviderConfig, RetryPolicy};
use crate::error::ProviderError;

const DEFAULT_API_BASE: &str = "https://api-inference.huggingface.co";
const DEFAULT_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";

pub struct HuggingFaceProvider {
    api_base: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
    http: HttpClient,
}

impl HuggingFaceProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self {
            api_base: config.base_url_or(DEFAULT_API_BASE),
            api_key: config.api_key().map(str::to_string),
            model: config
                .model
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            retry: config.retry_policy(0, 1.0),
            http: build_http_client(config.timeouts(15.0, 120.0))?,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}", self.api_base, self.model)
    }

    pub(crate) fn payload(prompt: &str, slot: ImageSlot) -> Value {
        let (width, height) = slot.dimensions();
        json!({
            "inputs": prompt,
            "parameters": {
                "width": snap_multiple(width, 8),
                "height": snap_multiple(height, 8),
                "seed": seed_for(prompt, slot),
                "negative_prompt": "text, watermark, logo, blurry, distorted",
            },
            "options": {"wait_for_model": true},
        })
    }
}

fn snap_multiple(value: u32, multiple: u32) -> u32 {
    let snapped = (value / multiple) * multiple;
    snapped.max(multiple)
}

impl ImageProvider for HuggingFaceProvider {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn attempt(&self, prompt: &str, slot: ImageSlot) -> Result<ProviderImage, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::missing_credentials(self.name(), "HF_TOKEN"));
        };
        let endpoint = self.endpoint();
        let payload = Self::payload(prompt, slot);
        let response = send_with_retries(self.name(), self.retry, || {
            self.http
                .post(&endpoint)
                .bearer_auth(api_key)
                .header(ACCEPT, "image/png")
                .json(&payload)
        })?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);
        if is_json {
            let body = read_json(self.name(), response)?;
            return image_from_json(self.name(), &body);
        }
        let bytes = response
            .bytes()
            .map_err(|err| ProviderError::transport(self.name(), &err))?
            .to_vec();
        ensure_image(self.name(), bytes, None)
    }
}
