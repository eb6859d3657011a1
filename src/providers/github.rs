use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::http::{ProviderHttp, TokenEndpoint};
use crate::{OAuthError, OAuthProvider, OAuthToken, ProviderSettings, RemoteIdentity};

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const EMAILS_URL: &str = "https://api.github.com/user/emails";
const USER_AGENT: &str = concat!("oauth-login/", env!("CARGO_PKG_VERSION"));

/// GitHub OAuth app.
///
/// Expiring tokens and refresh tokens only exist for GitHub apps that opted
/// in, so both are optional in the token payload.
#[derive(Debug, Clone)]
pub struct GitHubProvider {
    provider_key: String,
    client_id: String,
    client_secret: String,
    scope: String,
    http: ProviderHttp,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

impl GitHubProvider {
    pub fn new(provider_key: impl Into<String>, settings: &ProviderSettings, http: ProviderHttp) -> Self {
        Self {
            provider_key: provider_key.into(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            scope: settings.scope.clone(),
            http,
        }
    }

    async fn token(&self, mut payload: HashMap<String, String>) -> Result<OAuthToken, OAuthError> {
        payload.insert("client_id".to_string(), self.client_id.clone());
        payload.insert("client_secret".to_string(), self.client_secret.clone());

        let response = self
            .http
            .token_request(&TokenEndpoint::form(TOKEN_URL), payload)
            .await
            .map_err(OAuthError::ProviderExchange)?;
        OAuthToken::from_response(response, Utc::now())
    }

    fn api_headers(token: &OAuthToken) -> Vec<(String, String)> {
        vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("token {}", token.access_token)),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
        ]
    }
}

/// Only the verified primary address counts; the public profile email is optional.
pub(crate) fn verified_primary_email(emails: Vec<GitHubEmail>) -> Option<String> {
    emails
        .into_iter()
        .find(|email| email.primary && email.verified)
        .map(|email| email.email)
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn provider_key(&self) -> &str {
        &self.provider_key
    }

    fn authorization_url(&self) -> &str {
        AUTHORIZE_URL
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn client_secret(&self) -> &str {
        &self.client_secret
    }

    fn scope(&self) -> &str {
        &self.scope
    }

    async fn exchange_code(
        &self,
        code: &str,
        callback_url: &str,
    ) -> Result<OAuthToken, OAuthError> {
        self.token(HashMap::from([
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), callback_url.to_string()),
        ]))
        .await
    }

    async fn refresh_token(&self, token: &OAuthToken) -> Result<OAuthToken, OAuthError> {
        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            OAuthError::exchange_payload("github connection has no refresh token", String::new())
        })?;
        self.token(HashMap::from([
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token),
        ]))
        .await
    }

    async fn fetch_identity(&self, token: &OAuthToken) -> Result<RemoteIdentity, OAuthError> {
        let headers = Self::api_headers(token);
        let user: GitHubUser = self
            .http
            .get_json(USER_URL, &headers)
            .await
            .map_err(|err| OAuthError::ProviderIdentity(err.to_string()))?;
        let emails: Vec<GitHubEmail> = self
            .http
            .get_json(EMAILS_URL, &headers)
            .await
            .map_err(|err| OAuthError::ProviderIdentity(err.to_string()))?;

        let email = verified_primary_email(emails).ok_or_else(|| {
            OAuthError::ProviderIdentity(
                "a verified primary email address is required on GitHub".to_string(),
            )
        })?;

        Ok(RemoteIdentity {
            id: user.id.to_string(),
            username: Some(user.login),
            email,
        })
    }
}
