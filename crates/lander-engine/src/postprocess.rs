use std::collections::HashMap;

use anyhow::{bail, Context};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use lander_contracts::slots::{ImageSlot, OutputFormat};

use crate::config::PostProcessConfig;

const PNG_COMPRESSION_LADDER: [CompressionType; 3] = [
    CompressionType::Fast,
    CompressionType::Default,
    CompressionType::Best,
];

/// Final bytes for one slot plus what the encoder settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    /// JPEG quality, or the index into the PNG compression ladder.
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    pub within_budget: bool,
}

/// Height of the watermark band at the bottom of a generated image.
pub fn watermark_band(width: u32, height: u32) -> u32 {
    if width >= 1000 && height >= 800 {
        60
    } else if width >= 700 && height >= 500 {
        40
    } else if width >= 400 && height >= 300 {
        24
    } else {
        0
    }
}

pub fn crop_watermark(image: &DynamicImage) -> DynamicImage {
    let band = watermark_band(image.width(), image.height());
    if band == 0 || band >= image.height() {
        return image.clone();
    }
    image.crop_imm(0, 0, image.width(), image.height() - band)
}

/// Cover-resize then centre-crop to the slot's exact size.
pub fn fit_to_slot(image: &DynamicImage, slot: ImageSlot) -> DynamicImage {
    let (width, height) = slot.dimensions();
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    image.resize_to_fill(width, height, FilterType::Triangle)
}

fn luminance(rgb: [u8; 3]) -> f64 {
    0.299 * f64::from(rgb[0]) + 0.587 * f64::from(rgb[1]) + 0.114 * f64::from(rgb[2])
}

fn border_pixels(image: &RgbaImage) -> Vec<[u8; 3]> {
    let (width, height) = image.dimensions();
    let mut pixels = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                let pixel = image.get_pixel(x, y);
                pixels.push([pixel[0], pixel[1], pixel[2]]);
            }
        }
    }
    pixels
}

/// Most frequent light colour along the image border, averaged within its
/// quantization bucket. `None` when the border has no light colour.
pub fn dominant_light_border_color(image: &RgbaImage, min_luminance: f64) -> Option<[u8; 3]> {
    let mut buckets: HashMap<[u8; 3], (usize, [u64; 3])> = HashMap::new();
    for rgb in border_pixels(image) {
        if luminance(rgb) < min_luminance {
            continue;
        }
        let key = [rgb[0] >> 3, rgb[1] >> 3, rgb[2] >> 3];
        let entry = buckets.entry(key).or_insert((0, [0; 3]));
        entry.0 += 1;
        for (sum, channel) in entry.1.iter_mut().zip(rgb) {
            *sum += u64::from(channel);
        }
    }
    buckets
        .into_iter()
        // Tie-break on the key so HashMap order never leaks into the output.
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.0.cmp(&a.0)))
        .map(|(_, (count, sums))| {
            let count = count as u64;
            [
                (sums[0] / count) as u8,
                (sums[1] / count) as u8,
                (sums[2] / count) as u8,
            ]
        })
}

/// Clears every pixel close to the dominant light border colour. Cleared
/// pixels become fully zeroed so background noise costs nothing in the PNG.
pub fn make_transparent(image: &DynamicImage, threshold: f64, min_luminance: f64) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    let Some(background) = dominant_light_border_color(&rgba, min_luminance) else {
        return rgba;
    };
    for pixel in rgba.pixels_mut() {
        let distance = (0..3)
            .map(|i| {
                let delta = f64::from(pixel[i]) - f64::from(background[i]);
                delta * delta
            })
            .sum::<f64>()
            .sqrt();
        if distance < threshold {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }
    rgba
}

/// Composites any alpha onto white; JPEG has no alpha channel.
fn flatten_onto_white(image: &DynamicImage) -> DynamicImage {
    if !image.color().has_alpha() {
        return DynamicImage::ImageRgb8(image.to_rgb8());
    }
    let rgba = image.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(flattened).to_rgb8())
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))
        .with_context(|| format!("JPEG encode at quality {quality} failed"))?;
    Ok(bytes)
}

fn encode_png(image: &DynamicImage, compression: CompressionType) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_with_encoder(PngEncoder::new_with_quality(
            &mut bytes,
            compression,
            PngFilter::Adaptive,
        ))
        .context("PNG encode failed")?;
    Ok(bytes)
}

/// Encodes down a quality ladder until the result fits `budget` bytes.
/// When nothing fits, the last (smallest) attempt is kept and flagged.
pub fn encode_to_budget(
    image: &DynamicImage,
    format: OutputFormat,
    budget: u64,
    jpeg_ladder: &[u8],
) -> anyhow::Result<EncodedImage> {
    let (width, height) = (image.width(), image.height());
    let mut last: Option<(Vec<u8>, u8)> = None;
    match format {
        OutputFormat::Jpeg => {
            if jpeg_ladder.is_empty() {
                bail!("JPEG quality ladder is empty");
            }
            let rgb = flatten_onto_white(image);
            for quality in jpeg_ladder {
                let quality = (*quality).clamp(1, 100);
                let bytes = encode_jpeg(&rgb, quality)?;
                if bytes.len() as u64 <= budget {
                    return Ok(EncodedImage {
                        bytes,
                        format,
                        quality,
                        width,
                        height,
                        within_budget: true,
                    });
                }
                last = Some((bytes, quality));
            }
        }
        OutputFormat::Png => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            for (index, compression) in PNG_COMPRESSION_LADDER.into_iter().enumerate() {
                let bytes = encode_png(&rgba, compression)?;
                if bytes.len() as u64 <= budget {
                    return Ok(EncodedImage {
                        bytes,
                        format,
                        quality: index as u8,
                        width,
                        height,
                        within_budget: true,
                    });
                }
                last = Some((bytes, index as u8));
            }
        }
    }
    let Some((bytes, quality)) = last else {
        bail!("no {} encoding attempted", format.extension());
    };
    Ok(EncodedImage {
        bytes,
        format,
        quality,
        width,
        height,
        within_budget: false,
    })
}

/// Decode, crop the watermark band, fit, clear the favicon background and
/// encode to the slot's budget.
pub fn process(
    bytes: &[u8],
    slot: ImageSlot,
    watermarked: bool,
    config: &PostProcessConfig,
) -> anyhow::Result<EncodedImage> {
    let decoded = image::load_from_memory(bytes).context("image decode failed")?;
    let cropped = if watermarked {
        crop_watermark(&decoded)
    } else {
        decoded
    };
    let fitted = fit_to_slot(&cropped, slot);
    let prepared = if slot == ImageSlot::Favicon {
        DynamicImage::ImageRgba8(make_transparent(
            &fitted,
            config.transparency_threshold,
            config.border_min_luminance,
        ))
    } else {
        fitted
    };
    encode_to_budget(
        &prepared,
        slot.format(),
        slot.byte_budget(),
        &config.jpeg_quality_ladder,
    )
}
