use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::OAuthError;

const DEFAULT_CALLBACK_PATH: &str = "/oauth/{provider}/callback/";
const DEFAULT_LOGIN_REDIRECT_URL: &str = "/";
const ENV_PREFIX: &str = "OAUTH_LOGIN";

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    /// Adapter implementation identifier, e.g. "github".
    pub adapter: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ProviderSettings {
    pub fn new(
        adapter: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            adapter: adapter.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: String::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    pub base_url: String,
    /// Callback path; `{provider}` is replaced by the provider key.
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    /// Where a completed callback lands when no `next` was stashed.
    #[serde(default = "default_login_redirect_url")]
    pub login_redirect_url: String,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
}

fn default_callback_path() -> String {
    DEFAULT_CALLBACK_PATH.to_string()
}

fn default_login_redirect_url() -> String {
    DEFAULT_LOGIN_REDIRECT_URL.to_string()
}

impl LoginConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            callback_path: default_callback_path(),
            login_redirect_url: default_login_redirect_url(),
            http_timeout_secs: None,
            providers: BTreeMap::new(),
        }
    }

    pub fn with_provider(mut self, provider_key: impl Into<String>, settings: ProviderSettings) -> Self {
        self.providers.insert(provider_key.into(), settings);
        self
    }

    pub fn with_login_redirect_url(mut self, url: impl Into<String>) -> Self {
        self.login_redirect_url = url.into();
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self, OAuthError> {
        let mut config: LoginConfig = toml::from_str(source)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OAuthError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// `OAUTH_LOGIN_<KEY>_CLIENT_ID` and `OAUTH_LOGIN_<KEY>_CLIENT_SECRET` win
    /// over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (provider_key, settings) in &mut self.providers {
            let prefix = env_prefix(provider_key);
            if let Some(client_id) = lookup(&format!("{prefix}_CLIENT_ID")) {
                settings.client_id = client_id;
            }
            if let Some(client_secret) = lookup(&format!("{prefix}_CLIENT_SECRET")) {
                settings.client_secret = client_secret;
            }
        }
    }

    pub fn validate(&self) -> Result<(), OAuthError> {
        Url::parse(&self.base_url)?;
        for (provider_key, settings) in &self.providers {
            if settings.client_id.is_empty() {
                return Err(OAuthError::Config(format!(
                    "provider {provider_key} is missing client_id"
                )));
            }
            if settings.client_secret.is_empty() {
                return Err(OAuthError::Config(format!(
                    "provider {provider_key} is missing client_secret"
                )));
            }
        }
        Ok(())
    }

    pub fn callback_url(&self, provider_key: &str) -> String {
        let path = self.callback_path.replace("{provider}", provider_key);
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_secs.map(Duration::from_secs)
    }

    pub fn provider_keys(&self) -> BTreeSet<String> {
        self.providers.keys().cloned().collect()
    }
}

fn env_prefix(provider_key: &str) -> String {
    format!(
        "{ENV_PREFIX}_{}",
        provider_key.to_uppercase().replace('-', "_")
    )
}

/// Provider keys referenced by stored connections but missing from
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDrift {
    pub missing_keys: BTreeSet<String>,
}

impl fmt::Display for ConfigDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.missing_keys.iter().map(String::as_str).collect();
        write!(
            f,
            "the following oauth providers are in the database but not in the settings: {}",
            keys.join(", ")
        )
    }
}

pub fn check_provider_keys(
    stored_keys: &BTreeSet<String>,
    config: &LoginConfig,
) -> Option<ConfigDrift> {
    let missing_keys: BTreeSet<String> = stored_keys
        .iter()
        .filter(|key| !config.providers.contains_key(key.as_str()))
        .cloned()
        .collect();

    if missing_keys.is_empty() {
        None
    } else {
        Some(ConfigDrift { missing_keys })
    }
}
