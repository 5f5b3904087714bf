mod http;
mod huggingface;
mod pexels;
mod pixabay;
mod placeholder;
mod pollinations;
mod randomuser;

use lander_contracts::providers::{NamedProvider, ProviderRegistry};
use lander_contracts::slots::ImageSlot;
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;
use crate::error::ProviderError;

pub use http::{sniff_image_mime, MIN_IMAGE_BYTES};
pub use huggingface::HuggingFaceProvider;
pub use pexels::PexelsProvider;
pub use pixabay::PixabayProvider;
pub use placeholder::PlaceholderProvider;
pub use pollinations::PollinationsProvider;
pub use randomuser::RandomUserProvider;

/// Raw image bytes as handed back by a provider, before post-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderImage {
    pub bytes: Vec<u8>,
    pub provider: String,
    pub mime: Option<String>,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn attempt(&self, prompt: &str, slot: ImageSlot) -> Result<ProviderImage, ProviderError>;

    /// Boundary form of [`ImageProvider::attempt`]: every failure becomes `None`.
    fn fetch(&self, prompt: &str, slot: ImageSlot) -> Option<ProviderImage> {
        self.attempt(prompt, slot).ok()
    }
}

impl NamedProvider for Box<dyn ImageProvider> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }
}

pub type ImageProviderRegistry = ProviderRegistry<Box<dyn ImageProvider>>;

/// Every built-in client the config leaves enabled.
pub fn default_provider_registry(config: &EngineConfig) -> anyhow::Result<ImageProviderRegistry> {
    let providers = &config.providers;
    let mut registry = ImageProviderRegistry::default();
    if providers.pollinations.enabled {
        registry.register(Box::new(PollinationsProvider::new(&providers.pollinations)?));
    }
    if providers.huggingface.enabled {
        registry.register(Box::new(HuggingFaceProvider::new(&providers.huggingface)?));
    }
    if providers.pexels.enabled {
        registry.register(Box::new(PexelsProvider::new(&providers.pexels)?));
    }
    if providers.pixabay.enabled {
        registry.register(Box::new(PixabayProvider::new(&providers.pixabay)?));
    }
    if providers.randomuser.enabled {
        registry.register(Box::new(RandomUserProvider::new(&providers.randomuser)?));
    }
    if config.placeholder {
        registry.register(Box::new(PlaceholderProvider));
    }
    Ok(registry)
}

/// Stable per-prompt seed so about1..3 differ but re-runs stay reproducible.
pub(crate) fn seed_for(prompt: &str, slot: ImageSlot) -> u32 {
    let digest = prompt_digest(prompt, slot);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

pub(crate) fn prompt_digest(prompt: &str, slot: ImageSlot) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(slot.id().as_bytes());
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Short hex tag for logging which prompt a slot used.
pub fn prompt_hash(prompt: &str, slot: ImageSlot) -> String {
    hex::encode(&prompt_digest(prompt, slot)[..4])
}
