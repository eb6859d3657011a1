use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Failure talking to a provider endpoint, before it is classified as an
/// exchange or identity failure.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header: {name}={value}")]
    InvalidHeader { name: String, value: String },

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String, body: String },
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("os rng error: {message}")]
    OsRng { message: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("oauth provider {0} is not configured")]
    UnknownProvider(String),

    #[error("oauth provider {provider_key} uses unknown adapter {adapter}")]
    UnknownAdapter {
        provider_key: String,
        adapter: String,
    },

    #[error("state mismatch")]
    StateMismatch,

    #[error("missing authorization code in callback")]
    MissingAuthorizationCode,

    #[error("a user already exists with this email address")]
    UserAlreadyExists,

    #[error("cannot remove the last oauth connection without a usable password")]
    CannotDisconnect,

    #[error("oauth connection {provider_key}:{provider_user_id} not found")]
    NotFound {
        provider_key: String,
        provider_user_id: String,
    },

    #[error("authentication required")]
    NotAuthenticated,

    #[error("provider token exchange failed: {0}")]
    ProviderExchange(#[source] UpstreamError),

    #[error("provider identity unavailable: {0}")]
    ProviderIdentity(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl OAuthError {
    pub fn exchange_payload(message: impl Into<String>, body: impl Into<String>) -> Self {
        OAuthError::ProviderExchange(UpstreamError::InvalidResponse {
            message: message.into(),
            body: body.into(),
        })
    }

    /// Whether the boundary should show this error to the end user rather
    /// than treating it as a server fault.
    pub fn is_user_facing(&self) -> bool {
        self.status() < 500
    }

    pub fn status(&self) -> u16 {
        match self {
            OAuthError::StateMismatch
            | OAuthError::MissingAuthorizationCode
            | OAuthError::UserAlreadyExists
            | OAuthError::CannotDisconnect => 400,
            OAuthError::NotAuthenticated => 401,
            OAuthError::NotFound { .. } => 404,
            OAuthError::ProviderExchange(_) | OAuthError::ProviderIdentity(_) => 502,
            _ => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::Io(_) => "io_error",
            OAuthError::OsRng { .. } => "rng_error",
            OAuthError::Url(_) => "url_error",
            OAuthError::Toml(_) | OAuthError::Config(_) => "config_error",
            OAuthError::UnknownProvider(_) => "unknown_provider",
            OAuthError::UnknownAdapter { .. } => "unknown_adapter",
            OAuthError::StateMismatch => "state_mismatch",
            OAuthError::MissingAuthorizationCode => "missing_code",
            OAuthError::UserAlreadyExists => "user_already_exists",
            OAuthError::CannotDisconnect => "cannot_disconnect",
            OAuthError::NotFound { .. } => "not_found",
            OAuthError::NotAuthenticated => "not_authenticated",
            OAuthError::ProviderExchange(_) => "provider_exchange_error",
            OAuthError::ProviderIdentity(_) => "provider_identity_error",
            OAuthError::Store(_) => "store_error",
        }
    }

    /// Message safe to render to the person going through the flow.
    pub fn user_message(&self) -> String {
        match self {
            OAuthError::StateMismatch => {
                "The state parameter did not match. Please try again.".to_string()
            }
            OAuthError::MissingAuthorizationCode => {
                "The provider did not return an authorization code. Please try again.".to_string()
            }
            OAuthError::UserAlreadyExists => "A user already exists with this email address. \
                 Please log in first and then connect this OAuth provider to the existing account."
                .to_string(),
            OAuthError::CannotDisconnect => "This connection can't be removed. \
                 You must have a usable password or at least one active connection."
                .to_string(),
            OAuthError::NotFound { .. } => "That connection does not exist.".to_string(),
            OAuthError::NotAuthenticated => "Please log in first.".to_string(),
            OAuthError::ProviderExchange(_) | OAuthError::ProviderIdentity(_) => {
                "The login provider could not be reached. Please try again later.".to_string()
            }
            _ => "Something went wrong.".to_string(),
        }
    }

    pub fn response(&self) -> ErrorResponse {
        ErrorResponse {
            status: self.status(),
            code: self.code(),
            message: self.user_message(),
        }
    }
}

/// What the routing layer renders for a failed flow operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_errors_render_as_client_errors() {
        for err in [
            OAuthError::StateMismatch,
            OAuthError::UserAlreadyExists,
            OAuthError::CannotDisconnect,
            OAuthError::NotFound {
                provider_key: "github".to_string(),
                provider_user_id: "1".to_string(),
            },
        ] {
            let response = err.response();
            assert!((400..500).contains(&response.status), "{err}");
            assert!(err.is_user_facing());
        }
    }

    #[test]
    fn provider_failures_map_to_bad_gateway() {
        let err = OAuthError::exchange_payload("missing access_token", "{}");
        assert_eq!(err.status(), 502);
        assert_eq!(err.code(), "provider_exchange_error");
        assert!(!err.is_user_facing());
    }

    #[test]
    fn already_exists_tells_user_to_connect() {
        let message = OAuthError::UserAlreadyExists.user_message();
        assert!(message.contains("log in first"));
    }
}
