mod chains;
mod registry;

pub use chains::{ChainSelection, ChainSelector, FallbackOrder};
pub use registry::{ProviderCatalog, ProviderKind, ProviderSpec};
