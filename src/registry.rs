use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::http::ProviderHttp;
use crate::{
    BitbucketProvider, GitHubProvider, GitLabProvider, LoginConfig, OAuthError, OAuthProvider,
    ProviderSettings,
};

pub type ProviderFactory =
    fn(&str, &ProviderSettings, ProviderHttp) -> Result<Arc<dyn OAuthProvider>, OAuthError>;

/// Adapter implementations, keyed by the `adapter` identifier used in config.
#[derive(Clone)]
pub struct AdapterFactories {
    factories: HashMap<String, ProviderFactory>,
}

impl AdapterFactories {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut factories = Self::empty();
        factories.register("github", github);
        factories.register("gitlab", gitlab);
        factories.register("bitbucket", bitbucket);
        factories
    }

    pub fn register(&mut self, adapter: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(adapter.into(), factory);
    }

    /// Instantiate every configured provider. Run once at startup.
    pub fn build(&self, config: &LoginConfig) -> Result<ProviderRegistry, OAuthError> {
        let http = ProviderHttp::new(config.http_timeout())?;
        let mut registry = ProviderRegistry::new();

        for (provider_key, settings) in &config.providers {
            let factory =
                self.factories
                    .get(&settings.adapter)
                    .ok_or_else(|| OAuthError::UnknownAdapter {
                        provider_key: provider_key.clone(),
                        adapter: settings.adapter.clone(),
                    })?;
            registry.insert(provider_key.clone(), factory(provider_key, settings, http.clone())?);
        }

        info!(count = registry.count(), "registered oauth providers");
        Ok(registry)
    }
}

fn github(
    provider_key: &str,
    settings: &ProviderSettings,
    http: ProviderHttp,
) -> Result<Arc<dyn OAuthProvider>, OAuthError> {
    Ok(Arc::new(GitHubProvider::new(provider_key, settings, http)))
}

fn gitlab(
    provider_key: &str,
    settings: &ProviderSettings,
    http: ProviderHttp,
) -> Result<Arc<dyn OAuthProvider>, OAuthError> {
    Ok(Arc::new(GitLabProvider::new(provider_key, settings, http)))
}

fn bitbucket(
    provider_key: &str,
    settings: &ProviderSettings,
    http: ProviderHttp,
) -> Result<Arc<dyn OAuthProvider>, OAuthError> {
    Ok(Arc::new(BitbucketProvider::new(provider_key, settings, http)))
}

/// Configured providers keyed by provider key. Immutable once built.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &LoginConfig) -> Result<Self, OAuthError> {
        AdapterFactories::builtin().build(config)
    }

    pub fn insert(&mut self, provider_key: impl Into<String>, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider_key.into(), provider);
    }

    pub fn get(&self, provider_key: &str) -> Result<Arc<dyn OAuthProvider>, OAuthError> {
        self.providers
            .get(provider_key)
            .cloned()
            .ok_or_else(|| OAuthError::UnknownProvider(provider_key.to_string()))
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn count(&self) -> usize {
        self.providers.len()
    }
}
