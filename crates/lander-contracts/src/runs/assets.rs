use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::slots::ImageSlot;

/// One encoded image written for a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAsset {
    pub slot: ImageSlot,
    pub path: PathBuf,
    pub bytes: u64,
    pub mime: String,
    pub provider: String,
    pub width: u32,
    pub height: u32,
    /// Encoder quality (JPEG) or compression level index (PNG) that was kept.
    pub quality: u8,
    pub within_budget: bool,
}

pub fn asset_path(out_dir: &Path, slot: ImageSlot) -> PathBuf {
    out_dir.join(slot.file_name())
}

pub fn asset_exists(out_dir: &Path, slot: ImageSlot) -> bool {
    asset_path(out_dir, slot).is_file()
}

/// Writes `bytes` as the slot's file, replacing a previous run's file.
///
/// The write goes through a sibling temp file and a rename so a reader never
/// sees a half-written image.
pub fn write_asset_file(out_dir: &Path, slot: ImageSlot, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = asset_path(out_dir, slot);
    let tmp_path = out_dir.join(format!(".{}.partial", slot.file_name()));
    std::fs::write(&tmp_path, bytes)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, &path)
        .with_context(|| format!("failed to move asset into {}", path.display()))?;
    Ok(path)
}

/// Removes stale slot files so a re-run reflects only this run's outcomes.
pub fn clear_assets(out_dir: &Path, slots: &[ImageSlot]) -> anyhow::Result<()> {
    for slot in slots {
        let path = asset_path(out_dir, *slot);
        if path.is_file() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}
