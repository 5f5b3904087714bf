use lander_contracts::slots::{ImageSlot, SlotRole};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use super::http::{build_http_client, download_image, read_json, send_with_retries};
use super::{ImageProvider, ProviderImage};
use crate::config::{ProviderConfig, RetryPolicy};
use crate::error::ProviderError;
use crate::prompts::keywords;

const DEFAULT_API_BASE: &str = "https://pixabay.com";
const SEARCH_KEYWORDS: usize = 3;

pub struct PixabayProvider {
    api_base: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    http: HttpClient,
}

impl PixabayProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self {
            api_base: config.base_url_or(DEFAULT_API_BASE),
            api_key: config.api_key().map(str::to_string),
            retry: config.retry_policy(0, 1.0),
            http: build_http_client(config.timeouts(10.0, 30.0))?,
        })
    }
}

pub(crate) fn extract_hit_url(payload: &Value, slot: ImageSlot) -> Result<String, ProviderError> {
    let hits = payload
        .get("hits")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::unknown_shape("pixabay", "missing 'hits' array"))?;
    if hits.is_empty() {
        return Err(ProviderError::not_an_image("pixabay", "search returned no hits"));
    }
    let hit = &hits[(slot.ordinal() as usize - 1) % hits.len()];
    ["largeImageURL", "webformatURL"]
        .iter()
        .filter_map(|key| hit.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|url| url.starts_with("http"))
        .map(str::to_string)
        .ok_or_else(|| ProviderError::unknown_shape("pixabay", "hit has no image URL"))
}

impl ImageProvider for PixabayProvider {
    fn name(&self) -> &str {
        "pixabay"
    }

    fn attempt(&self, prompt: &str, slot: ImageSlot) -> Result<ProviderImage, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::missing_credentials(self.name(), "PIXABAY_API_KEY"));
        };
        let query = keywords(prompt, SEARCH_KEYWORDS).join(" ");
        if query.is_empty() {
            return Err(ProviderError::not_an_image(self.name(), "empty search query"));
        }
        let orientation = match slot.role() {
            SlotRole::Hero | SlotRole::About => "horizontal",
            _ => "all",
        };
        let endpoint = format!("{}/api/", self.api_base);
        let response = send_with_retries(self.name(), self.retry, || {
            self.http.get(&endpoint).query(&[
                ("key", api_key),
                ("q", query.as_str()),
                ("image_type", "photo"),
                ("orientation", orientation),
                ("safesearch", "true"),
                ("per_page", "5"),
            ])
        })?;
        let payload = read_json(self.name(), response)?;
        let url = extract_hit_url(&payload, slot)?;
        download_image(&self.http, self.name(), &url)
    }
}
