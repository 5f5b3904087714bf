use thiserror::Error;

/// Why a single provider call produced no image.
///
/// Never escapes a slot: the fallback sequencer records it and moves on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} transport failure: {detail}")]
    Transport {
        provider: String,
        detail: String,
        retryable: bool,
    },
    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("{provider} returned a non-image payload ({reason})")]
    NotAnImage { provider: String, reason: String },
    #[error("{provider} response has an unknown shape: {detail}")]
    UnknownShape { provider: String, detail: String },
    #[error("{provider} is missing credentials ({env})")]
    MissingCredentials { provider: String, env: String },
    #[error("{provider} image could not be decoded: {detail}")]
    Decode { provider: String, detail: String },
}

impl ProviderError {
    pub fn transport(provider: &str, err: &reqwest::Error) -> Self {
        let mut detail = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !text.trim().is_empty() && !detail.contains(text.trim()) {
                detail.push_str(" | caused by: ");
                detail.push_str(text.trim());
            }
            source = cause.source();
        }
        ProviderError::Transport {
            provider: provider.to_string(),
            detail: truncate_text(&detail, 512),
            retryable: err.is_timeout() || err.is_connect() || err.is_request(),
        }
    }

    pub fn unknown_shape(provider: &str, detail: impl Into<String>) -> Self {
        ProviderError::UnknownShape {
            provider: provider.to_string(),
            detail: detail.into(),
        }
    }

    pub fn not_an_image(provider: &str, reason: impl Into<String>) -> Self {
        ProviderError::NotAnImage {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing_credentials(provider: &str, env: &str) -> Self {
        ProviderError::MissingCredentials {
            provider: provider.to_string(),
            env: env.to_string(),
        }
    }

    /// Stable label used in the event log.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Transport { .. } => "transport",
            ProviderError::Status { .. } => "status",
            ProviderError::NotAnImage { .. } => "not_an_image",
            ProviderError::UnknownShape { .. } => "unknown_shape",
            ProviderError::MissingCredentials { .. } => "missing_credentials",
            ProviderError::Decode { .. } => "decode",
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Transport { provider, .. }
            | ProviderError::Status { provider, .. }
            | ProviderError::NotAnImage { provider, .. }
            | ProviderError::UnknownShape { provider, .. }
            | ProviderError::MissingCredentials { provider, .. }
            | ProviderError::Decode { provider, .. } => provider,
        }
    }

    /// 429, 5xx and transient transport failures are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport { retryable, .. } => *retryable,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
