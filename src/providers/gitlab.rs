use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::http::{ProviderHttp, TokenEndpoint};
use crate::{OAuthError, OAuthProvider, OAuthToken, ProviderSettings, RemoteIdentity};

const DEFAULT_BASE_URL: &str = "https://gitlab.com";

/// GitLab.com or a self-managed instance (`base_url` adapter param).
#[derive(Debug, Clone)]
pub struct GitLabProvider {
    provider_key: String,
    client_id: String,
    client_secret: String,
    scope: String,
    authorize_url: String,
    token_url: String,
    user_url: String,
    http: ProviderHttp,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GitLabUser {
    id: u64,
    username: String,
    email: Option<String>,
    confirmed_at: Option<String>,
}

impl GitLabProvider {
    pub fn new(provider_key: impl Into<String>, settings: &ProviderSettings, http: ProviderHttp) -> Self {
        let base_url = settings
            .param("base_url")
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        Self {
            provider_key: provider_key.into(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            scope: settings.scope.clone(),
            authorize_url: format!("{base_url}/oauth/authorize"),
            token_url: format!("{base_url}/oauth/token"),
            user_url: format!("{base_url}/api/v4/user"),
            http,
        }
    }

    async fn token(&self, mut payload: HashMap<String, String>) -> Result<OAuthToken, OAuthError> {
        payload.insert("client_id".to_string(), self.client_id.clone());
        payload.insert("client_secret".to_string(), self.client_secret.clone());

        let response = self
            .http
            .token_request(&TokenEndpoint::form(self.token_url.as_str()), payload)
            .await
            .map_err(OAuthError::ProviderExchange)?;
        OAuthToken::from_response(response, Utc::now())
    }
}

pub(crate) fn identity_from_user(user: GitLabUser) -> Result<RemoteIdentity, OAuthError> {
    let email = match (user.email, user.confirmed_at) {
        (Some(email), Some(_)) if !email.is_empty() => email,
        _ => {
            return Err(OAuthError::ProviderIdentity(
                "a confirmed email address is required on GitLab".to_string(),
            ));
        }
    };
    Ok(RemoteIdentity {
        id: user.id.to_string(),
        username: Some(user.username),
        email,
    })
}

#[async_trait]
impl OAuthProvider for GitLabProvider {
    fn provider_key(&self) -> &str {
        &self.provider_key
    }

    fn authorization_url(&self) -> &str {
        &self.authorize_url
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
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), callback_url.to_string()),
        ]))
        .await
    }

    async fn refresh_token(&self, token: &OAuthToken) -> Result<OAuthToken, OAuthError> {
        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            OAuthError::exchange_payload("gitlab connection has no refresh token", String::new())
        })?;
        self.token(HashMap::from([
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token),
        ]))
        .await
    }

    async fn fetch_identity(&self, token: &OAuthToken) -> Result<RemoteIdentity, OAuthError> {
        let headers = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", token.access_token),
        )];
        let user: GitLabUser = self
            .http
            .get_json(&self.user_url, &headers)
            .await
            .map_err(|err| OAuthError::ProviderIdentity(err.to_string()))?;
        identity_from_user(user)
    }
}
