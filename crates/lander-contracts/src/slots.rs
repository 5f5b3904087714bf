use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const JPEG_BYTE_BUDGET: u64 = 150 * 1024;
pub const FAVICON_BYTE_BUDGET: u64 = 50 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSlot {
    Main,
    About1,
    About2,
    About3,
    Review1,
    Review2,
    Review3,
    Favicon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
}

/// Broad role of a slot; fallback chains are chosen per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRole {
    Hero,
    About,
    Review,
    Favicon,
}

impl ImageSlot {
    pub const ALL: [ImageSlot; 8] = [
        ImageSlot::Main,
        ImageSlot::About1,
        ImageSlot::About2,
        ImageSlot::About3,
        ImageSlot::Review1,
        ImageSlot::Review2,
        ImageSlot::Review3,
        ImageSlot::Favicon,
    ];

    pub fn id(self) -> &'static str {
        match self {
            ImageSlot::Main => "main",
            ImageSlot::About1 => "about1",
            ImageSlot::About2 => "about2",
            ImageSlot::About3 => "about3",
            ImageSlot::Review1 => "review1",
            ImageSlot::Review2 => "review2",
            ImageSlot::Review3 => "review3",
            ImageSlot::Favicon => "favicon",
        }
    }

    pub fn role(self) -> SlotRole {
        match self {
            ImageSlot::Main => SlotRole::Hero,
            ImageSlot::About1 | ImageSlot::About2 | ImageSlot::About3 => SlotRole::About,
            ImageSlot::Review1 | ImageSlot::Review2 | ImageSlot::Review3 => SlotRole::Review,
            ImageSlot::Favicon => SlotRole::Favicon,
        }
    }

    /// 1-based position within the slot's role group (`about2` -> 2).
    pub fn ordinal(self) -> u32 {
        match self {
            ImageSlot::About2 | ImageSlot::Review2 => 2,
            ImageSlot::About3 | ImageSlot::Review3 => 3,
            _ => 1,
        }
    }

    pub fn dimensions(self) -> (u32, u32) {
        match self.role() {
            SlotRole::Hero => (1200, 800),
            SlotRole::About => (800, 600),
            SlotRole::Review => (400, 400),
            SlotRole::Favicon => (256, 256),
        }
    }

    pub fn byte_budget(self) -> u64 {
        match self.role() {
            SlotRole::Favicon => FAVICON_BYTE_BUDGET,
            _ => JPEG_BYTE_BUDGET,
        }
    }

    pub fn prompt_budget(self) -> usize {
        match self.role() {
            SlotRole::Hero => 400,
            SlotRole::About => 300,
            SlotRole::Review => 220,
            SlotRole::Favicon => 160,
        }
    }

    pub fn format(self) -> OutputFormat {
        match self.role() {
            SlotRole::Favicon => OutputFormat::Png,
            _ => OutputFormat::Jpeg,
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.{}", self.id(), self.format().extension())
    }
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ImageSlot {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        // gallery1-3 is the older name for the review slots
        let normalized = match normalized.as_str() {
            "gallery1" => "review1",
            "gallery2" => "review2",
            "gallery3" => "review3",
            other => other,
        };
        ImageSlot::ALL
            .iter()
            .copied()
            .find(|slot| slot.id() == normalized)
            .ok_or_else(|| format!("Unknown image slot '{raw}'."))
    }
}

/// Parses a comma separated slot list; an empty list means every slot.
pub fn parse_slot_list(raw: &str) -> Result<Vec<ImageSlot>, String> {
    let mut slots = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let slot = part.parse::<ImageSlot>()?;
        if !slots.contains(&slot) {
            slots.push(slot);
        }
    }
    if slots.is_empty() {
        return Ok(ImageSlot::ALL.to_vec());
    }
    slots.sort();
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::{parse_slot_list, ImageSlot, OutputFormat};

    #[test]
    fn slot_file_names_follow_format() {
        assert_eq!(ImageSlot::Main.file_name(), "main.jpg");
        assert_eq!(ImageSlot::Review3.file_name(), "review3.jpg");
        assert_eq!(ImageSlot::Favicon.file_name(), "favicon.png");
        assert_eq!(ImageSlot::Favicon.format(), OutputFormat::Png);
    }

    #[test]
    fn budgets_match_asset_contract() {
        for slot in ImageSlot::ALL {
            if slot == ImageSlot::Favicon {
                assert_eq!(slot.byte_budget(), 50 * 1024);
            } else {
                assert_eq!(slot.byte_budget(), 150 * 1024);
            }
        }
    }

    #[test]
    fn slot_parsing_accepts_gallery_alias() {
        assert_eq!("Gallery2".parse::<ImageSlot>(), Ok(ImageSlot::Review2));
        assert_eq!(" about3 ".parse::<ImageSlot>(), Ok(ImageSlot::About3));
        assert!("hero".parse::<ImageSlot>().is_err());
    }

    #[test]
    fn slot_list_dedupes_and_defaults_to_all() {
        assert_eq!(
            parse_slot_list("favicon, main,main").unwrap(),
            vec![ImageSlot::Main, ImageSlot::Favicon]
        );
        assert_eq!(parse_slot_list("").unwrap().len(), 8);
    }
}
