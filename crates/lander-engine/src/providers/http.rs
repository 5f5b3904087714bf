use std::thread;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use super::ProviderImage;
use crate::config::{RetryPolicy, Timeouts};
use crate::error::{truncate_text, ProviderError};

/// Anything shorter is an error page or an empty body, not a photo.
pub const MIN_IMAGE_BYTES: usize = 1024;

pub(crate) fn build_http_client(timeouts: Timeouts) -> anyhow::Result<HttpClient> {
    HttpClient::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.read)
        .user_agent(concat!("lander/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

/// Mime type from magic bytes; `None` for anything that is not a known raster format.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

pub(crate) fn ensure_image(
    provider: &str,
    bytes: Vec<u8>,
    content_type: Option<&str>,
) -> Result<ProviderImage, ProviderError> {
    let Some(mime) = sniff_image_mime(&bytes) else {
        let hint = content_type.unwrap_or("unknown content-type");
        let preview = String::from_utf8_lossy(&bytes[..bytes.len().min(80)]).to_string();
        return Err(ProviderError::not_an_image(
            provider,
            format!("{hint}, starts with {:?}", truncate_text(preview.trim(), 60)),
        ));
    };
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(ProviderError::not_an_image(
            provider,
            format!("{} bytes is below the {MIN_IMAGE_BYTES} byte minimum", bytes.len()),
        ));
    }
    Ok(ProviderImage {
        bytes,
        provider: provider.to_string(),
        mime: Some(mime.to_string()),
    })
}

/// Sends the request built by `build`, retrying per `policy` on 429/5xx and
/// transient transport failures with linear backoff.
pub(crate) fn send_with_retries<F>(
    provider: &str,
    policy: RetryPolicy,
    mut build: F,
) -> Result<HttpResponse, ProviderError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        let result = build()
            .send()
            .map_err(|err| ProviderError::transport(provider, &err))
            .and_then(|response| check_status(provider, response));
        match result {
            Ok(response) => return Ok(response),
            Err(err) if err.is_retryable() && attempt < policy.retries => {
                thread::sleep(policy.delay_for(attempt));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn check_status(provider: &str, response: HttpResponse) -> Result<HttpResponse, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ProviderError::Status {
        provider: provider.to_string(),
        status: status.as_u16(),
        body: truncate_text(body.trim(), 256),
    })
}

fn content_type(response: &HttpResponse) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase())
}

pub(crate) fn read_json(provider: &str, response: HttpResponse) -> Result<Value, ProviderError> {
    let body = response
        .text()
        .map_err(|err| ProviderError::transport(provider, &err))?;
    serde_json::from_str(&body).map_err(|_| {
        ProviderError::unknown_shape(
            provider,
            format!("expected JSON, got {:?}", truncate_text(body.trim(), 80)),
        )
    })
}

pub(crate) fn read_image(provider: &str, response: HttpResponse) -> Result<ProviderImage, ProviderError> {
    let content_type = content_type(&response);
    let bytes = response
        .bytes()
        .map_err(|err| ProviderError::transport(provider, &err))?
        .to_vec();
    ensure_image(provider, bytes, content_type.as_deref())
}

/// Second leg of the search-then-download providers.
pub(crate) fn download_image(
    http: &HttpClient,
    provider: &str,
    url: &str,
) -> Result<ProviderImage, ProviderError> {
    let response = send_with_retries(provider, RetryPolicy::none(), || http.get(url))?;
    read_image(provider, response)
}

/// Finds an inline base64 image in a JSON payload (`data:` URLs, `b64_json`,
/// `image` or `images[0]`). Anything else is an unknown shape.
pub(crate) fn image_from_json(provider: &str, payload: &Value) -> Result<ProviderImage, ProviderError> {
    if let Some(message) = payload.get("error").and_then(Value::as_str) {
        return Err(ProviderError::not_an_image(
            provider,
            truncate_text(message.trim(), 200),
        ));
    }
    let candidate = match payload {
        Value::Array(rows) => rows.first().and_then(inline_image_field),
        other => inline_image_field(other),
    };
    let Some(encoded) = candidate else {
        return Err(ProviderError::unknown_shape(
            provider,
            "no inline image field in JSON response",
        ));
    };
    let data = encoded
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(encoded);
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|err| ProviderError::not_an_image(provider, format!("invalid base64: {err}")))?;
    ensure_image(provider, bytes, None)
}

fn inline_image_field(value: &Value) -> Option<&str> {
    value
        .get("b64_json")
        .or_else(|| value.get("image"))
        .or_else(|| {
            value
                .get("images")
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
        })
        .and_then(Value::as_str)
        .filter(|raw| !raw.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use base64::Engine as _;
    use reqwest::blocking::Client as HttpClient;
    use serde_json::json;

    use super::{
        ensure_image, image_from_json, send_with_retries, sniff_image_mime, BASE64,
        MIN_IMAGE_BYTES,
    };
    use crate::config::RetryPolicy;
    use crate::testing::StubServer;

    fn policy(retries: usize) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff: Duration::from_millis(20),
        }
    }

    fn fake_png(len: usize) -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.resize(len, 0);
        bytes
    }

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_image_mime(&fake_png(16)), Some("image/png"));
        assert_eq!(sniff_image_mime(b"GIF89a...."), Some("image/gif"));
        assert_eq!(sniff_image_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_image_mime(b"<!DOCTYPE html>"), None);
    }

    #[test]
    fn html_error_page_is_not_an_image() {
        let err = ensure_image(
            "pollinations",
            b"<html><body>Rate limited</body></html>".to_vec(),
            Some("text/html"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "not_an_image");
        assert!(err.to_string().contains("text/html"));
    }

    #[test]
    fn tiny_payload_is_rejected_even_with_valid_magic() {
        let err = ensure_image("pexels", fake_png(64), None).unwrap_err();
        assert_eq!(err.kind(), "not_an_image");
        let ok = ensure_image("pexels", fake_png(MIN_IMAGE_BYTES), None).unwrap();
        assert_eq!(ok.mime.as_deref(), Some("image/png"));
        assert_eq!(ok.provider, "pexels");
    }

    #[test]
    fn inline_base64_images_are_decoded() {
        let encoded = BASE64.encode(fake_png(2048));
        let from_data_url = image_from_json(
            "huggingface",
            &json!({"image": format!("data:image/png;base64,{encoded}")}),
        )
        .unwrap();
        assert_eq!(from_data_url.bytes.len(), 2048);

        let from_list = image_from_json("huggingface", &json!([{"b64_json": encoded}])).unwrap();
        assert_eq!(from_list.mime.as_deref(), Some("image/png"));
    }

    #[test]
    fn json_without_image_is_unknown_shape() {
        let err = image_from_json("huggingface", &json!({"generated_text": "hi"})).unwrap_err();
        assert_eq!(err.kind(), "unknown_shape");

        let err = image_from_json(
            "huggingface",
            &json!({"error": "Model is currently loading"}),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "not_an_image");
    }

    #[test]
    fn server_errors_are_retried_with_linear_backoff() -> anyhow::Result<()> {
        let server = StubServer::start(503, "text/plain", "busy")?;
        let http = HttpClient::new();
        let started = Instant::now();
        let err = send_with_retries("pollinations", policy(2), || http.get(&server.base_url))
            .unwrap_err();
        assert_eq!(err.kind(), "status");
        assert!(err.is_retryable());
        assert_eq!(server.hits(), 3);
        // 20 ms before the first retry, 40 ms before the second.
        assert!(started.elapsed() >= Duration::from_millis(60));
        Ok(())
    }

    #[test]
    fn rate_limit_is_retried() -> anyhow::Result<()> {
        let server = StubServer::start(429, "text/plain", "slow down")?;
        let http = HttpClient::new();
        let err = send_with_retries("pollinations", policy(1), || http.get(&server.base_url))
            .unwrap_err();
        assert_eq!(err.kind(), "status");
        assert_eq!(server.hits(), 2);
        Ok(())
    }

    #[test]
    fn client_errors_are_not_retried() -> anyhow::Result<()> {
        let server = StubServer::start(404, "text/plain", "no such model")?;
        let http = HttpClient::new();
        let err = send_with_retries("pollinations", policy(3), || http.get(&server.base_url))
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("404"));
        assert_eq!(server.hits(), 1);

        let ok = StubServer::start(200, "text/plain", "fine")?;
        let response = send_with_retries("pollinations", policy(3), || http.get(&ok.base_url))?;
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(ok.hits(), 1);
        Ok(())
    }
}
