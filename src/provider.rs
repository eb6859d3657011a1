use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{OAuthError, OAuthToken, RemoteIdentity, state};

/// One login provider, configured under a provider key.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// The key this instance was configured under (e.g. "github").
    fn provider_key(&self) -> &str;
    fn authorization_url(&self) -> &str;
    fn client_id(&self) -> &str;
    fn client_secret(&self) -> &str;
    fn scope(&self) -> &str;

    async fn exchange_code(&self, code: &str, callback_url: &str)
    -> Result<OAuthToken, OAuthError>;

    async fn refresh_token(&self, token: &OAuthToken) -> Result<OAuthToken, OAuthError>;

    async fn fetch_identity(&self, token: &OAuthToken) -> Result<RemoteIdentity, OAuthError>;

    fn generate_state(&self) -> Result<String, OAuthError> {
        state::generate_state()
    }

    /// Provider-specific additions to the default authorization parameters.
    fn extra_authorization_params(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Query parameters for the authorization redirect, including a fresh state.
    fn authorization_params(
        &self,
        callback_url: &str,
    ) -> Result<BTreeMap<String, String>, OAuthError> {
        let mut params: BTreeMap<String, String> =
            self.extra_authorization_params().into_iter().collect();
        params.insert("redirect_uri".to_string(), callback_url.to_string());
        params.insert("client_id".to_string(), self.client_id().to_string());
        params.insert("scope".to_string(), self.scope().to_string());
        params.insert("state".to_string(), self.generate_state()?);
        params.insert("response_type".to_string(), "code".to_string());
        Ok(params)
    }
}
