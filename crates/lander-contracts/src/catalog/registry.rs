use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::slots::SlotRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Generative,
    StockPhoto,
    Avatar,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: String,
    pub kind: ProviderKind,
    pub roles: Vec<SlotRole>,
    /// Env var holding the API credential, if the provider needs one.
    pub credential_env: Option<String>,
    /// Output carries a provider logo band at the bottom edge.
    pub watermarked: bool,
}

impl ProviderSpec {
    pub fn serves(&self, role: SlotRole) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    providers: IndexMap<String, ProviderSpec>,
}

impl ProviderCatalog {
    pub fn new(providers: Option<IndexMap<String, ProviderSpec>>) -> Self {
        Self {
            providers: providers.unwrap_or_else(default_providers),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProviderSpec> {
        self.providers.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.providers.values()
    }

    pub fn ensure(&self, name: &str, role: SlotRole) -> Option<&ProviderSpec> {
        self.get(name).filter(|spec| spec.serves(role))
    }

    pub fn is_watermarked(&self, name: &str) -> bool {
        self.get(name).map(|spec| spec.watermarked).unwrap_or(false)
    }
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_providers() -> IndexMap<String, ProviderSpec> {
    use SlotRole::{About, Favicon, Hero, Review};

    let mut map = IndexMap::new();
    let mut insert = |name: &str,
                      kind: ProviderKind,
                      roles: &[SlotRole],
                      credential_env: Option<&str>,
                      watermarked: bool| {
        map.insert(
            name.to_string(),
            ProviderSpec {
                name: name.to_string(),
                kind,
                roles: roles.to_vec(),
                credential_env: credential_env.map(str::to_string),
                watermarked,
            },
        );
    };

    insert(
        "pollinations",
        ProviderKind::Generative,
        &[Hero, About, Review, Favicon],
        None,
        true,
    );
    insert(
        "huggingface",
        ProviderKind::Generative,
        &[Hero, About, Review, Favicon],
        Some("HF_TOKEN"),
        false,
    );
    insert(
        "pexels",
        ProviderKind::StockPhoto,
        &[Hero, About, Review],
        Some("PEXELS_API_KEY"),
        false,
    );
    insert(
        "pixabay",
        ProviderKind::StockPhoto,
        &[Hero, About, Review],
        Some("PIXABAY_API_KEY"),
        false,
    );
    insert("randomuser", ProviderKind::Avatar, &[Review], None, false);
    insert(
        "placeholder",
        ProviderKind::Placeholder,
        &[Hero, About, Review, Favicon],
        None,
        false,
    );

    map
}
