use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::registry::ProviderCatalog;
use crate::slots::{ImageSlot, SlotRole};

/// Fixed provider priority preset. Chains are never re-ranked at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackOrder {
    #[default]
    GenerativeFirst,
    StockFirst,
}

impl FallbackOrder {
    fn base_chain(self, role: SlotRole) -> &'static [&'static str] {
        match (self, role) {
            (_, SlotRole::Favicon) => &["pollinations", "huggingface"],
            (FallbackOrder::GenerativeFirst, SlotRole::Review) => &[
                "randomuser",
                "pollinations",
                "huggingface",
                "pexels",
                "pixabay",
            ],
            (FallbackOrder::GenerativeFirst, _) => {
                &["pollinations", "huggingface", "pexels", "pixabay"]
            }
            (FallbackOrder::StockFirst, SlotRole::Review) => &[
                "randomuser",
                "pexels",
                "pixabay",
                "pollinations",
                "huggingface",
            ],
            (FallbackOrder::StockFirst, _) => &["pexels", "pixabay", "pollinations", "huggingface"],
        }
    }
}

impl fmt::Display for FallbackOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FallbackOrder::GenerativeFirst => "generative-first",
            FallbackOrder::StockFirst => "stock-first",
        })
    }
}

impl FromStr for FallbackOrder {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "generative-first" | "generative" => Ok(FallbackOrder::GenerativeFirst),
            "stock-first" | "stock" => Ok(FallbackOrder::StockFirst),
            other => Err(format!("Unknown fallback order '{other}'.")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSelection {
    pub slot: ImageSlot,
    pub providers: Vec<String>,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChainSelector {
    pub catalog: ProviderCatalog,
    pub order: FallbackOrder,
    pub include_placeholder: bool,
}

impl ChainSelector {
    pub fn new(catalog: Option<ProviderCatalog>, order: FallbackOrder) -> Self {
        Self {
            catalog: catalog.unwrap_or_default(),
            order,
            include_placeholder: false,
        }
    }

    pub fn with_placeholder(mut self, include: bool) -> Self {
        self.include_placeholder = include;
        self
    }

    /// Ordered provider names for `slot`; a `requested` provider that can
    /// serve the slot is moved to the front of the chain.
    pub fn select(
        &self,
        requested: Option<&str>,
        slot: ImageSlot,
    ) -> Result<ChainSelection, String> {
        let role = slot.role();
        let mut providers: Vec<String> = self
            .order
            .base_chain(role)
            .iter()
            .filter(|name| self.catalog.ensure(name, role).is_some())
            .map(|name| (*name).to_string())
            .collect();
        if self.include_placeholder && self.catalog.ensure("placeholder", role).is_some() {
            providers.push("placeholder".to_string());
        }

        let mut fallback_reason = None;
        if let Some(requested_value) = requested {
            if self.catalog.ensure(requested_value, role).is_some() {
                providers.retain(|name| name != requested_value);
                providers.insert(0, requested_value.to_string());
            } else {
                fallback_reason = Some(format!(
                    "Requested provider '{requested_value}' unavailable for slot '{slot}'."
                ));
            }
        }

        if providers.is_empty() {
            return Err(format!("No providers available for slot '{slot}'."));
        }
        Ok(ChainSelection {
            slot,
            providers,
            requested: requested.map(str::to_string),
            fallback_reason,
        })
    }
}
