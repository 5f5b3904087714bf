use lander_contracts::slots::ImageSlot;
use reqwest::blocking::Client as HttpClient;
use reqwest::Url;

use super::http::{build_http_client, read_image, send_with_retries};
use super::{seed_for, ImageProvider, ProviderImage};
use crate::config::{ProviderConfig, RetryPolicy};
use crate::error::ProviderError;

const DEFAULT_API_BASE: &str = "https://image.pollinations.ai";

/// Primary text-to-image client. The only provider that retries on its own.
pub struct PollinationsProvider {
    api_base: String,
    model: Option<String>,
    retry: RetryPolicy,
    http: HttpClient,
}

impl PollinationsProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self {
            api_base: config.base_url_or(DEFAULT_API_BASE),
            model: config.model.clone().filter(|value| !value.trim().is_empty()),
            retry: config.retry_policy(2, 2.0),
            http: build_http_client(config.timeouts(20.0, 120.0))?,
        })
    }

    pub(crate) fn request_url(&self, prompt: &str, slot: ImageSlot) -> Result<Url, ProviderError> {
        let (width, height) = slot.dimensions();
        let mut url = Url::parse(&self.api_base).map_err(|err| {
            ProviderError::unknown_shape(self.name(), format!("invalid API base: {err}"))
        })?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::unknown_shape(self.name(), "API base cannot take a path"))?
            .pop_if_empty()
            .push("prompt")
            .push(prompt);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("width", &width.to_string())
                .append_pair("height", &height.to_string())
                .append_pair("seed", &seed_for(prompt, slot).to_string())
                .append_pair("nologo", "true");
            if let Some(model) = &self.model {
                query.append_pair("model", model);
            }
        }
        Ok(url)
    }
}

impl ImageProvider for PollinationsProvider {
    fn name(&self) -> &str {
        "pollinations"
    }

    fn attempt(&self, prompt: &str, slot: ImageSlot) -> Result<ProviderImage, ProviderError> {
        let url = self.request_url(prompt, slot)?;
        let response = send_with_retries(self.name(), self.retry, || self.http.get(url.clone()))?;
        read_image(self.name(), response)
    }
}
