use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::http::{ProviderHttp, TokenEndpoint};
use crate::{OAuthError, OAuthProvider, OAuthToken, ProviderSettings, RemoteIdentity};

const AUTHORIZE_URL: &str = "https://bitbucket.org/site/oauth2/authorize";
const TOKEN_URL: &str = "https://bitbucket.org/site/oauth2/access_token";
const USER_URL: &str = "https://api.bitbucket.org/2.0/user";
const EMAILS_URL: &str = "https://api.bitbucket.org/2.0/user/emails";

/// Bitbucket Cloud. Client credentials go in HTTP basic auth.
#[derive(Debug, Clone)]
pub struct BitbucketProvider {
    provider_key: String,
    client_id: String,
    client_secret: String,
    scope: String,
    http: ProviderHttp,
}

#[derive(Debug, Deserialize)]
struct BitbucketUser {
    uuid: String,
    username: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BitbucketEmails {
    values: Vec<BitbucketEmail>,
}

#[derive(Debug, Deserialize)]
struct BitbucketEmail {
    email: String,
    is_primary: bool,
    is_confirmed: bool,
}

impl BitbucketProvider {
    pub fn new(provider_key: impl Into<String>, settings: &ProviderSettings, http: ProviderHttp) -> Self {
        Self {
            provider_key: provider_key.into(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            scope: settings.scope.clone(),
            http,
        }
    }

    async fn token(&self, payload: HashMap<String, String>) -> Result<OAuthToken, OAuthError> {
        let endpoint = TokenEndpoint::form(TOKEN_URL)
            .with_basic_auth(self.client_id.as_str(), self.client_secret.as_str());
        let response = self
            .http
            .token_request(&endpoint, payload)
            .await
            .map_err(OAuthError::ProviderExchange)?;
        OAuthToken::from_response(response, Utc::now())
    }
}

pub(crate) fn confirmed_primary_email(emails: BitbucketEmails) -> Option<String> {
    emails
        .values
        .into_iter()
        .find(|email| email.is_primary && email.is_confirmed)
        .map(|email| email.email)
}

#[async_trait]
impl OAuthProvider for BitbucketProvider {
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
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), callback_url.to_string()),
        ]))
        .await
    }

    async fn refresh_token(&self, token: &OAuthToken) -> Result<OAuthToken, OAuthError> {
        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            OAuthError::exchange_payload("bitbucket connection has no refresh token", String::new())
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
        let user: BitbucketUser = self
            .http
            .get_json(USER_URL, &headers)
            .await
            .map_err(|err| OAuthError::ProviderIdentity(err.to_string()))?;
        let emails: BitbucketEmails = self
            .http
            .get_json(EMAILS_URL, &headers)
            .await
            .map_err(|err| OAuthError::ProviderIdentity(err.to_string()))?;

        let email = confirmed_primary_email(emails).ok_or_else(|| {
            OAuthError::ProviderIdentity(
                "a confirmed primary email address is required on Bitbucket".to_string(),
            )
        })?;

        Ok(RemoteIdentity {
            id: user.uuid,
            username: Some(user.username),
            email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_confirmed_primary_email() {
        let emails: BitbucketEmails = serde_json::from_str(
            r#"{"values": [
                {"email": "a@example.com", "is_primary": true, "is_confirmed": false},
                {"email": "b@example.com", "is_primary": false, "is_confirmed": true},
                {"email": "c@example.com", "is_primary": true, "is_confirmed": true}
            ]}"#,
        )
        .unwrap();
        assert_eq!(confirmed_primary_email(emails).as_deref(), Some("c@example.com"));
    }

    #[test]
    fn empty_email_list() {
        let emails: BitbucketEmails = serde_json::from_str(r#"{"values": []}"#).unwrap();
        assert_eq!(confirmed_primary_email(emails), None);
    }
}
