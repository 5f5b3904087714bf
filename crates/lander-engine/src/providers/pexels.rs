use lander_contracts::slots::{ImageSlot, SlotRole};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;

use super::http::{build_http_client, download_image, read_json, send_with_retries};
use super::{ImageProvider, ProviderImage};
use crate::config::{ProviderConfig, RetryPolicy};
use crate::error::ProviderError;
use crate::prompts::keywords;

const DEFAULT_API_BASE: &str = "https://api.pexels.com";
const SEARCH_KEYWORDS: usize = 4;
const PER_PAGE: u32 = 6;

pub struct PexelsProvider {
    api_base: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    http: HttpClient,
}

impl PexelsProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self {
            api_base: config.base_url_or(DEFAULT_API_BASE),
            api_key: config.api_key().map(str::to_string),
            retry: config.retry_policy(0, 1.0),
            http: build_http_client(config.timeouts(10.0, 30.0))?,
        })
    }
}

fn orientation(slot: ImageSlot) -> &'static str {
    match slot.role() {
        SlotRole::Review | SlotRole::Favicon => "square",
        _ => "landscape",
    }
}

/// Picks the photo for `slot` from a search payload. Sibling slots take
/// different results so about1..3 are not the same picture.
pub(crate) fn extract_photo_url(payload: &Value, slot: ImageSlot) -> Result<String, ProviderError> {
    let photos = payload
        .get("photos")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::unknown_shape("pexels", "missing 'photos' array"))?;
    if photos.is_empty() {
        return Err(ProviderError::not_an_image("pexels", "search returned no photos"));
    }
    let photo = &photos[(slot.ordinal() as usize - 1) % photos.len()];
    let src = photo
        .get("src")
        .and_then(Value::as_object)
        .ok_or_else(|| ProviderError::unknown_shape("pexels", "photo without 'src' object"))?;
    ["large2x", "large", "original"]
        .iter()
        .filter_map(|key| src.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|url| url.starts_with("http"))
        .map(str::to_string)
        .ok_or_else(|| ProviderError::unknown_shape("pexels", "photo 'src' has no usable URL"))
}

impl ImageProvider for PexelsProvider {
    fn name(&self) -> &str {
        "pexels"
    }

    fn attempt(&self, prompt: &str, slot: ImageSlot) -> Result<ProviderImage, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::missing_credentials(self.name(), "PEXELS_API_KEY"));
        };
        let query = keywords(prompt, SEARCH_KEYWORDS).join(" ");
        if query.is_empty() {
            return Err(ProviderError::not_an_image(self.name(), "empty search query"));
        }
        let endpoint = format!("{}/v1/search", self.api_base);
        let per_page = PER_PAGE.to_string();
        let response = send_with_retries(self.name(), self.retry, || {
            self.http
                .get(&endpoint)
                .header(AUTHORIZATION, api_key)
                .query(&[
                    ("query", query.as_str()),
                    ("per_page", per_page.as_str()),
                    ("orientation", orientation(slot)),
                ])
        })?;
        let payload = read_json(self.name(), response)?;
        let url = extract_photo_url(&payload, slot)?;
        download_image(&self.http, self.name(), &url)
    }
}

#[cfg(test)]
mod tests {
    use lander_contracts::slots::ImageSlot;
    use serde_json::json;

    use super::{extract_photo_url, orientation};

    fn payload() -> serde_json::Value {
        json!({
            "photos": [
                {"src": {"large2x": "https://images.pexels.com/1-large2x.jpg", "original": "https://images.pexels.com/1.jpg"}},
                {"src": {"large": "https://images.pexels.com/2-large.jpg"}},
            ]
        })
    }

    #[test]
    fn prefers_large2x_and_rotates_by_ordinal() {
        assert_eq!(
            extract_photo_url(&payload(), ImageSlot::About1).unwrap(),
            "https://images.pexels.com/1-large2x.jpg"
        );
        assert_eq!(
            extract_photo_url(&payload(), ImageSlot::About2).unwrap(),
            "https://images.pexels.com/2-large.jpg"
        );
        assert_eq!(
            extract_photo_url(&payload(), ImageSlot::About3).unwrap(),
            "https://images.pexels.com/1-large2x.jpg"
        );
    }

    #[test]
    fn schema_drift_is_unknown_shape() {
        let err = extract_photo_url(&json!({"results": []}), ImageSlot::Main).unwrap_err();
        assert_eq!(err.kind(), "unknown_shape");
        let err = extract_photo_url(&json!({"photos": [{"url": "x"}]}), ImageSlot::Main)
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_shape");
    }

    #[test]
    fn empty_search_is_not_an_image() {
        let err = extract_photo_url(&json!({"photos": []}), ImageSlot::Main).unwrap_err();
        assert_eq!(err.kind(), "not_an_image");
    }

    #[test]
    fn avatars_search_square_photos() {
        assert_eq!(orientation(ImageSlot::Review2), "square");
        assert_eq!(orientation(ImageSlot::Main), "landscape");
    }
}
