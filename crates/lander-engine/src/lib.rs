pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod postprocess;
pub mod prompts;
pub mod providers;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use engine::{LandingEngine, RunMode, SlotOutcome};
pub use error::ProviderError;
pub use prompts::{PromptBuilder, PromptSet};
