use lander_contracts::slots::ImageSlot;

use crate::error::ProviderError;
use crate::providers::{ImageProvider, ProviderImage};

/// One provider that was tried for a slot and yielded nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub provider: String,
    pub kind: &'static str,
    pub message: String,
}

impl From<&ProviderError> for FailedAttempt {
    fn from(err: &ProviderError) -> Self {
        Self {
            provider: err.provider().to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Acquisition<T> {
    pub slot: ImageSlot,
    pub value: Option<T>,
    pub provider: Option<String>,
    pub failures: Vec<FailedAttempt>,
    pub attempted: usize,
}

impl<T> Acquisition<T> {
    pub fn is_produced(&self) -> bool {
        self.value.is_some()
    }
}

pub fn acquire(
    chain: &[&dyn ImageProvider],
    prompt: &str,
    slot: ImageSlot,
) -> Acquisition<ProviderImage> {
    acquire_with(chain, prompt, slot, Ok)
}

/// Walks `chain` in order and stops at the first provider whose image is
/// also accepted by `accept`. A rejection counts as that provider failing,
/// so a payload that will not decode moves on to the next provider.
pub fn acquire_with<T, F>(
    chain: &[&dyn ImageProvider],
    prompt: &str,
    slot: ImageSlot,
    mut accept: F,
) -> Acquisition<T>
where
    F: FnMut(ProviderImage) -> Result<T, ProviderError>,
{
    let mut failures = Vec::new();
    let mut attempted = 0;
    for provider in chain {
        attempted += 1;
        match provider.attempt(prompt, slot).and_then(&mut accept) {
            Ok(value) => {
                return Acquisition {
                    slot,
                    value: Some(value),
                    provider: Some(provider.name().to_string()),
                    failures,
                    attempted,
                };
            }
            Err(err) => failures.push(FailedAttempt::from(&err)),
        }
    }
    Acquisition {
        slot,
        value: None,
        provider: None,
        failures,
        attempted,
    }
}
