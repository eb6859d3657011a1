use std::collections::HashMap;
use std::time::Duration;

use reqwest::{
    Client, RequestBuilder,
    header::{HeaderName, HeaderValue},
};
use serde::de::DeserializeOwned;

use crate::{OAuthError, TokenResponse, UpstreamError};

/// Form-encoded token endpoint of one provider.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Client credentials sent as HTTP basic auth instead of in the body.
    pub basic_auth: Option<(String, String)>,
}

impl TokenEndpoint {
    pub fn form(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            basic_auth: None,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }
}

/// HTTP plumbing shared by the bundled adapters.
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    http: Client,
}

impl ProviderHttp {
    pub fn new(timeout: Option<Duration>) -> Result<Self, OAuthError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|err| OAuthError::Config(format!("http client: {err}")))?;
        Ok(Self { http })
    }

    pub async fn token_request(
        &self,
        endpoint: &TokenEndpoint,
        payload: HashMap<String, String>,
    ) -> Result<TokenResponse, UpstreamError> {
        let mut builder = self.http.post(&endpoint.url);
        builder = apply_headers(builder, &endpoint.headers)?;
        if let Some((username, password)) = &endpoint.basic_auth {
            builder = builder.basic_auth(username, Some(password));
        }

        let body = send(builder.form(&payload)).await?;
        parse_json(body)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<T, UpstreamError> {
        let builder = apply_headers(self.http.get(url), headers)?;
        let body = send(builder).await?;
        parse_json(body)
    }
}

async fn send(builder: RequestBuilder) -> Result<String, UpstreamError> {
    let response = builder.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(UpstreamError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: String) -> Result<T, UpstreamError> {
    serde_json::from_str(&body).map_err(|err| UpstreamError::InvalidResponse {
        message: err.to_string(),
        body,
    })
}

fn apply_headers(
    mut builder: RequestBuilder,
    headers: &[(String, String)],
) -> Result<RequestBuilder, UpstreamError> {
    for (name, value) in headers {
        let name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| UpstreamError::InvalidHeader {
                name: name.clone(),
                value: value.clone(),
            })?;
        let value = HeaderValue::from_str(value).map_err(|_| UpstreamError::InvalidHeader {
            name: name.to_string(),
            value: value.clone(),
        })?;
        builder = builder.header(name, value);
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_endpoint_asks_for_json() {
        let endpoint = TokenEndpoint::form("https://example.com/token").with_basic_auth("id", "secret");
        assert!(endpoint
            .headers
            .iter()
            .any(|(name, value)| name == "Accept" && value == "application/json"));
        assert_eq!(endpoint.basic_auth, Some(("id".to_string(), "secret".to_string())));
    }

    #[test]
    fn parse_json_keeps_body_on_failure() {
        let result: Result<TokenResponse, _> = parse_json("not json".to_string());
        match result {
            Err(UpstreamError::InvalidResponse { body, .. }) => assert_eq!(body, "not json"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
