use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::OAuthError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            access_token_expires_at: None,
            refresh_token_expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Convert a raw token endpoint payload, anchoring relative lifetimes at `now`.
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self, OAuthError> {
        if response.access_token.is_empty() {
            return Err(OAuthError::exchange_payload(
                "token response has an empty access_token",
                String::new(),
            ));
        }

        let expires_at = |field: &str, seconds: Option<u64>| match seconds {
            None => Ok(None),
            Some(seconds) => i64::try_from(seconds)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| now.checked_add_signed(lifetime))
                .map(Some)
                .ok_or_else(|| {
                    OAuthError::exchange_payload(
                        format!("{field} out of range"),
                        seconds.to_string(),
                    )
                }),
        };

        Ok(Self {
            access_token_expires_at: expires_at("expires_in", response.expires_in)?,
            refresh_token_expires_at: expires_at(
                "refresh_token_expires_in",
                response.refresh_token_expires_in,
            )?,
            access_token: response.access_token,
            refresh_token: response.refresh_token.filter(|token| !token.is_empty()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    pub id: String,
    pub username: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

/// Persistent link between a local user and one remote identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub user_id: UserId,
    pub provider_key: String,
    pub provider_user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn token(&self) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            access_token_expires_at: self.access_token_expires_at,
            refresh_token_expires_at: self.refresh_token_expires_at,
        }
    }

    pub fn set_token_fields(&mut self, token: &OAuthToken) {
        self.access_token = token.access_token.clone();
        self.refresh_token = token.refresh_token.clone();
        self.access_token_expires_at = token.access_token_expires_at;
        self.refresh_token_expires_at = token.refresh_token_expires_at;
    }

    pub fn set_identity_fields(&mut self, identity: &RemoteIdentity) {
        self.provider_user_id = identity.id.clone();
    }

    pub fn access_token_expired(&self) -> bool {
        self.access_token_expired_at(Utc::now())
    }

    pub fn refresh_token_expired(&self) -> bool {
        self.refresh_token_expired_at(Utc::now())
    }

    pub fn access_token_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.access_token_expires_at.is_some_and(|at| at < now)
    }

    pub fn refresh_token_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token_expires_at.is_some_and(|at| at < now)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}:{}]",
            self.provider_key, self.user_id, self.provider_user_id
        )
    }
}

/// Write model for [`crate::ConnectionStore::create_or_update`]. The store
/// owns the timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUpsert {
    pub user_id: UserId,
    pub provider_key: String,
    pub provider_user_id: String,
    pub token: OAuthToken,
}

impl ConnectionUpsert {
    pub fn new(
        user_id: UserId,
        provider_key: impl Into<String>,
        identity: &RemoteIdentity,
        token: &OAuthToken,
    ) -> Self {
        Self {
            user_id,
            provider_key: provider_key.into(),
            provider_user_id: identity.id.clone(),
            token: token.clone(),
        }
    }
}

impl From<&Connection> for ConnectionUpsert {
    fn from(connection: &Connection) -> Self {
        Self {
            user_id: connection.user_id.clone(),
            provider_key: connection.provider_key.clone(),
            provider_user_id: connection.provider_user_id.clone(),
            token: connection.token(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token_expires_in: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

impl CallbackParams {
    pub fn new(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
        }
    }

    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }

    pub fn from_url(callback_url: &str) -> Result<Self, OAuthError> {
        let url = Url::parse(callback_url)?;
        Ok(Self::from_query(url.query().unwrap_or("")))
    }
}
