//! Per-slot prompt construction.
//!
//! Prompts start from a hand-written template per slot, optionally get
//! rewritten by a local model, and are always squeezed into the slot's
//! character budget before they leave this module.

mod enrich;

use std::collections::BTreeMap;

use lander_contracts::slots::{ImageSlot, SlotRole};

pub use enrich::{EnrichmentClient, EnrichmentConfig};

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "for", "to", "in", "on", "at", "by", "with",
    "from", "into", "onto", "over", "under", "is", "are", "was", "were", "be", "been", "being",
    "it", "its", "this", "that", "these", "those", "as", "very", "really", "just", "some",
    "any", "such", "their", "there", "which", "who", "whom", "while", "also", "then", "than",
    "so", "too", "can", "will", "would", "should", "could", "has", "have", "had",
];

const REVIEW_PERSONAS: [&str; 3] = ["young woman", "middle-aged man", "senior woman"];

pub fn is_stop_word(token: &str) -> bool {
    let bare = token
        .trim_matches(|ch: char| !ch.is_alphanumeric())
        .to_lowercase();
    !bare.is_empty() && STOP_WORDS.contains(&bare.as_str())
}

/// Fits `text` into `budget` characters.
///
/// Stop-words are dropped first; if that is not enough the text is cut at the
/// last word boundary that fits. A single word longer than the budget is
/// hard-cut by characters.
pub fn optimize_prompt(text: &str, budget: usize) -> String {
    let normalized = text.split_whitespace().collect::<Vec<&str>>().join(" ");
    if normalized.chars().count() <= budget {
        return normalized;
    }

    let without_stop_words = normalized
        .split(' ')
        .filter(|token| !is_stop_word(token))
        .collect::<Vec<&str>>()
        .join(" ");
    let without_stop_words = trim_dangling(&without_stop_words);
    if without_stop_words.chars().count() <= budget {
        return without_stop_words;
    }

    let mut out = String::new();
    let mut used = 0usize;
    for word in without_stop_words.split(' ') {
        let word_chars = word.chars().count();
        let needed = if out.is_empty() {
            word_chars
        } else {
            word_chars + 1
        };
        if used + needed > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        used += needed;
    }
    if out.is_empty() {
        return without_stop_words.chars().take(budget).collect();
    }
    trim_dangling(&out)
}

fn trim_dangling(text: &str) -> String {
    text.trim_end_matches(|ch: char| ch.is_whitespace() || matches!(ch, ',' | ';' | ':' | '-'))
        .trim_start()
        .to_string()
}

/// First `count` significant tokens of `prompt`, used as a stock-photo query.
pub fn keywords(prompt: &str, count: usize) -> Vec<String> {
    prompt
        .split(|ch: char| ch.is_whitespace() || ch == ',')
        .map(|token| token.trim_matches(|ch: char| !ch.is_alphanumeric()))
        .filter(|token| !token.is_empty() && !is_stop_word(token))
        .filter(|token| !matches!(token.to_lowercase().as_str(), "no" | "text" | "logo"))
        .take(count)
        .map(str::to_string)
        .collect()
}

pub fn template_prompt(theme: &str, slot: ImageSlot) -> String {
    let theme = theme.split_whitespace().collect::<Vec<&str>>().join(" ");
    let theme = if theme.is_empty() {
        "local business".to_string()
    } else {
        theme
    };
    match (slot.role(), slot.ordinal()) {
        (SlotRole::Hero, _) => format!(
            "Wide professional hero photograph for a {theme} business, inviting atmosphere, \
             natural light, high detail, shallow depth of field, no text, no logo"
        ),
        (SlotRole::About, 1) => format!(
            "Interior of a {theme}, cozy and welcoming space, professional photography, \
             warm tones, no people, no text"
        ),
        (SlotRole::About, 2) => format!(
            "Friendly staff at work in a {theme}, candid professional photo, natural light, \
             authentic moment, no text"
        ),
        (SlotRole::About, _) => format!(
            "Close-up of the signature products of a {theme}, detailed, appealing, \
             studio lighting, clean background, no text"
        ),
        (SlotRole::Review, ordinal) => {
            let persona = REVIEW_PERSONAS[(ordinal as usize - 1) % REVIEW_PERSONAS.len()];
            format!(
                "Portrait photo of a happy {persona}, satisfied customer of a {theme}, \
                 headshot, smiling, soft blurred background, natural light"
            )
        }
        (SlotRole::Favicon, _) => format!(
            "Minimal flat vector icon for a {theme} brand, one simple bold shape, centered, \
             plain white background, no text"
        ),
    }
}

/// Prompts for one run, keyed by slot. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptSet {
    prompts: BTreeMap<ImageSlot, String>,
}

impl PromptSet {
    pub fn get(&self, slot: ImageSlot) -> Option<&str> {
        self.prompts.get(&slot).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ImageSlot, &str)> {
        self.prompts
            .iter()
            .map(|(slot, prompt)| (*slot, prompt.as_str()))
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

impl FromIterator<(ImageSlot, String)> for PromptSet {
    fn from_iter<I: IntoIterator<Item = (ImageSlot, String)>>(iter: I) -> Self {
        Self {
            prompts: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    enrichment: Option<EnrichmentClient>,
}

impl PromptBuilder {
    pub fn new(enrichment: Option<EnrichmentClient>) -> Self {
        Self { enrichment }
    }

    pub fn has_enrichment(&self) -> bool {
        self.enrichment.is_some()
    }

    /// Template prompt fitted to the slot budget; never touches the network.
    pub fn template(&self, theme: &str, slot: ImageSlot) -> String {
        optimize_prompt(&template_prompt(theme, slot), slot.prompt_budget())
    }

    pub fn build(&self, theme: &str, slot: ImageSlot) -> String {
        self.build_enriched(theme, slot)
            .unwrap_or_else(|| self.template(theme, slot))
    }

    /// Enriched prompt for `slot`, or `None` when there is no enrichment
    /// service, it failed, or its answer fits down to the template itself.
    pub fn build_enriched(&self, theme: &str, slot: ImageSlot) -> Option<String> {
        let client = self.enrichment.as_ref()?;
        let text = client.enrich(theme, slot, &template_prompt(theme, slot))?;
        let enriched = optimize_prompt(&text, slot.prompt_budget());
        (!enriched.is_empty() && enriched != self.template(theme, slot)).then_some(enriched)
    }

    pub fn templates(&self, theme: &str, slots: &[ImageSlot]) -> PromptSet {
        slots
            .iter()
            .map(|slot| (*slot, self.template(theme, *slot)))
            .collect()
    }

    pub fn build_all(&self, theme: &str, slots: &[ImageSlot]) -> PromptSet {
        slots
            .iter()
            .map(|slot| (*slot, self.build(theme, *slot)))
            .collect()
    }

    /// Only the slots enrichment actually rewrote.
    pub fn enrich_all(&self, theme: &str, slots: &[ImageSlot]) -> PromptSet {
        slots
            .iter()
            .filter_map(|slot| {
                self.build_enriched(theme, *slot)
                    .map(|prompt| (*slot, prompt))
            })
            .collect()
    }
}
