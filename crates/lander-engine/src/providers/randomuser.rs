use lander_contracts::slots::ImageSlot;
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use super::http::{build_http_client, download_image, read_json, send_with_retries};
use super::{prompt_hash, ImageProvider, ProviderImage};
use crate::config::{ProviderConfig, RetryPolicy};
use crate::error::ProviderError;

const DEFAULT_API_BASE: &str = "https://randomuser.me";

/// Avatar source for the review slots.
pub struct RandomUserProvider {
    api_base: String,
    retry: RetryPolicy,
    http: HttpClient,
}

impl RandomUserProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self {
            api_base: config.base_url_or(DEFAULT_API_BASE),
            retry: config.retry_policy(0, 1.0),
            http: build_http_client(config.timeouts(10.0, 30.0))?,
        })
    }
}

pub(crate) fn extract_picture_url(payload: &Value) -> Result<String, ProviderError> {
    payload
        .get("results")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("picture"))
        .and_then(|picture| picture.get("large"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| url.starts_with("http"))
        .map(str::to_string)
        .ok_or_else(|| ProviderError::unknown_shape("randomuser", "no results[0].picture.large"))
}

impl ImageProvider for RandomUserProvider {
    fn name(&self) -> &str {
        "randomuser"
    }

    fn attempt(&self, prompt: &str, slot: ImageSlot) -> Result<ProviderImage, ProviderError> {
        let endpoint = format!("{}/api/", self.api_base);
        let seed = prompt_hash(prompt, slot);
        let response = send_with_retries(self.name(), self.retry, || {
            self.http
                .get(&endpoint)
                .query(&[("inc", "picture"), ("noinfo", ""), ("seed", seed.as_str())])
        })?;
        let payload = read_json(self.name(), response)?;
        let url = extract_picture_url(&payload)?;
        download_image(&self.http, self.name(), &url)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::extract_picture_url;

    #[test]
    fn reads_large_picture() {
        let payload = json!({
            "results": [{"picture": {
                "large": "https://randomuser.me/api/portraits/women/44.jpg",
                "thumbnail": "https://randomuser.me/api/portraits/thumb/women/44.jpg"
            }}]
        });
        assert_eq!(
            extract_picture_url(&payload).unwrap(),
            "https://randomuser.me/api/portraits/women/44.jpg"
        );
    }

    #[test]
    fn unexpected_payload_is_unknown_shape() {
        let err = extract_picture_url(&json!({"error": "Uh oh"})).unwrap_err();
        assert_eq!(err.kind(), "unknown_shape");
    }
}
