use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};
use lander_contracts::slots::ImageSlot;

use super::{prompt_digest, ImageProvider, ProviderImage};
use crate::error::ProviderError;

/// Offline last resort: a diagonal two-tone gradient at the slot's size,
/// coloured from the prompt digest so every slot looks different.
pub struct PlaceholderProvider;

impl PlaceholderProvider {
    pub(crate) fn render(prompt: &str, slot: ImageSlot) -> RgbaImage {
        let digest = prompt_digest(prompt, slot);
        let start = [digest[0], digest[1], digest[2]];
        let end = [digest[3], digest[4], digest[5]];
        let (width, height) = slot.dimensions();
        let span = (width + height).saturating_sub(2).max(1) as f32;
        RgbaImage::from_fn(width, height, |x, y| {
            let t = (x + y) as f32 / span;
            let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
            Rgba([
                mix(start[0], end[0]),
                mix(start[1], end[1]),
                mix(start[2], end[2]),
                255,
            ])
        })
    }
}

impl ImageProvider for PlaceholderProvider {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn attempt(&self, prompt: &str, slot: ImageSlot) -> Result<ProviderImage, ProviderError> {
        let mut out = Cursor::new(Vec::new());
        Self::render(prompt, slot)
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|err| ProviderError::Decode {
                provider: self.name().to_string(),
                detail: err.to_string(),
            })?;
        Ok(ProviderImage {
            bytes: out.into_inner(),
            provider: self.name().to_string(),
            mime: Some("image/png".to_string()),
        })
    }
}
