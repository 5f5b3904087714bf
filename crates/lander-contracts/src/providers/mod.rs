/// Providers registered with an engine, kept in registration order.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

pub trait NamedProvider {
    fn name(&self) -> &str;
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    /// Registers `provider`, replacing any existing provider with the same name.
    pub fn register(&mut self, provider: T) {
        if let Some(existing) = self
            .providers
            .iter_mut()
            .find(|existing| existing.name() == provider.name())
        {
            *existing = provider;
            return;
        }
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }

    /// Maps a chain of names onto registered providers, preserving chain
    /// order and skipping names nothing is registered under.
    pub fn resolve_chain<S: AsRef<str>>(&self, names: &[S]) -> Vec<&T> {
        names
            .iter()
            .filter_map(|name| self.get(name.as_ref()))
            .collect()
    }
}

impl<T: NamedProvider> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
