//! Login, signup, connect and disconnect flows.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ConfigDrift, check_provider_keys};
use crate::state::{self, Session, SessionKey};
use crate::{
    CallbackParams, Connection, ConnectionStore, ConnectionUpsert, LoginConfig, OAuthError,
    OAuthToken, ProviderRegistry, RemoteIdentity, StoreError, User, UserId, UserStore,
};

const DEFAULT_DISCONNECT_REDIRECT_URL: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Initiated,
    AwaitingCallback,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Login,
    Signup,
    /// Authenticated caller attached or refreshed an identity.
    Connect,
}

#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub kind: CallbackKind,
    pub user_id: UserId,
    pub connection: Connection,
    pub redirect_url: String,
}

pub struct FlowController<C, U> {
    registry: Arc<ProviderRegistry>,
    connections: C,
    users: U,
    config: LoginConfig,
}

impl<C, U> FlowController<C, U>
where
    C: ConnectionStore,
    U: UserStore,
{
    pub fn new(registry: Arc<ProviderRegistry>, connections: C, users: U, config: LoginConfig) -> Self {
        Self {
            registry,
            connections,
            users,
            config,
        }
    }

    pub fn connections(&self) -> &C {
        &self.connections
    }

    pub fn users(&self) -> &U {
        &self.users
    }

    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    pub fn handle_login_request(
        &self,
        provider_key: &str,
        session: &mut dyn Session,
        next: Option<&str>,
    ) -> Result<String, OAuthError> {
        debug!(provider = provider_key, stage = ?FlowStage::Initiated, "starting oauth flow");
        let provider = self.registry.get(provider_key)?;
        let callback_url = self.config.callback_url(provider_key);
        let params = provider.authorization_params(&callback_url)?;

        if let Some(pending) = params.get("state") {
            state::store_state(session, pending);
            debug!(
                provider = provider_key,
                stage = ?FlowStage::AwaitingCallback,
                state = %state::state_fingerprint(pending),
                "stored pending oauth state"
            );
        }

        if let Some(next) = next {
            session.set(SessionKey::Next, next.to_string());
        }

        let mut url = Url::parse(provider.authorization_url())?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    // Same redirect as login; the routing layer requires an authenticated caller.
    pub fn handle_connect_request(
        &self,
        provider_key: &str,
        session: &mut dyn Session,
        next: Option<&str>,
    ) -> Result<String, OAuthError> {
        self.handle_login_request(provider_key, session, next)
    }

    pub async fn handle_callback_request(
        &self,
        provider_key: &str,
        session: &mut dyn Session,
        params: &CallbackParams,
    ) -> Result<CallbackOutcome, OAuthError> {
        let result = self.complete_callback(provider_key, session, params).await;
        match &result {
            Ok(outcome) => info!(
                provider = provider_key,
                stage = ?FlowStage::Completed,
                kind = ?outcome.kind,
                user_id = %outcome.user_id,
                "oauth callback completed"
            ),
            Err(err) => warn!(
                provider = provider_key,
                stage = ?FlowStage::Failed,
                error = %err,
                "oauth callback failed"
            ),
        }
        result
    }

    async fn complete_callback(
        &self,
        provider_key: &str,
        session: &mut dyn Session,
        params: &CallbackParams,
    ) -> Result<CallbackOutcome, OAuthError> {
        state::verify_state(session, params.state.as_deref())?;
        let code = params
            .code
            .as_deref()
            .ok_or(OAuthError::MissingAuthorizationCode)?;

        let provider = self.registry.get(provider_key)?;
        let callback_url = self.config.callback_url(provider_key);
        let token = provider.exchange_code(code, &callback_url).await?;
        let identity = provider.fetch_identity(&token).await?;

        let (kind, user_id, connection) = match session.authenticated_user() {
            Some(user_id) => {
                let connection = self
                    .connect(&user_id, provider_key, &token, &identity)
                    .await?;
                (CallbackKind::Connect, user_id, connection)
            }
            None => {
                let (kind, user, connection) =
                    self.login_or_signup(provider_key, &token, &identity).await?;
                session.login(&user);
                (kind, user.id, connection)
            }
        };

        let redirect_url = session
            .pop(SessionKey::Next)
            .unwrap_or_else(|| self.config.login_redirect_url.clone());

        Ok(CallbackOutcome {
            kind,
            user_id,
            connection,
            redirect_url,
        })
    }

    async fn connect(
        &self,
        user_id: &UserId,
        provider_key: &str,
        token: &OAuthToken,
        identity: &RemoteIdentity,
    ) -> Result<Connection, OAuthError> {
        let existing = self
            .connections
            .find_by_user_provider_remote_id(user_id, provider_key, &identity.id)
            .await?;

        let connection = match existing {
            Some(mut connection) => {
                connection.set_identity_fields(identity);
                connection.set_token_fields(token);
                self.connections
                    .create_or_update(ConnectionUpsert::from(&connection))
                    .await?
            }
            None => {
                let connection = self
                    .connections
                    .create_or_update(ConnectionUpsert::new(
                        user_id.clone(),
                        provider_key,
                        identity,
                        token,
                    ))
                    .await?;
                info!(
                    provider = provider_key,
                    user_id = %user_id,
                    "connected new oauth identity"
                );
                connection
            }
        };
        Ok(connection)
    }

    async fn login_or_signup(
        &self,
        provider_key: &str,
        token: &OAuthToken,
        identity: &RemoteIdentity,
    ) -> Result<(CallbackKind, User, Connection), OAuthError> {
        if let Some(mut connection) = self
            .connections
            .find_by_provider_and_remote_id(provider_key, &identity.id)
            .await?
        {
            connection.set_token_fields(token);
            let connection = self
                .connections
                .create_or_update(ConnectionUpsert::from(&connection))
                .await?;
            let user = self
                .users
                .get_user(&connection.user_id)
                .await?
                .ok_or_else(|| {
                    StoreError::Backend(format!("user {} of {connection} is missing", connection.user_id))
                })?;
            return Ok((CallbackKind::Login, user, connection));
        }

        let email = self.users.normalize_email(&identity.email);
        let username = signup_username(identity);
        let user = match self.users.create_user(&username, &email).await {
            Ok(user) => user,
            Err(StoreError::Uniqueness(reason)) => {
                debug!(provider = provider_key, reason = %reason, "signup collided with existing user");
                return Err(OAuthError::UserAlreadyExists);
            }
            Err(err) => return Err(err.into()),
        };

        let connection = self
            .connections
            .create_or_update(ConnectionUpsert::new(
                user.id.clone(),
                provider_key,
                identity,
                token,
            ))
            .await?;
        info!(provider = provider_key, user_id = %user.id, "created user from oauth identity");
        Ok((CallbackKind::Signup, user, connection))
    }

    /// Remove one of the caller's own connections, as long as a way to log
    /// in remains afterwards.
    pub async fn handle_disconnect_request(
        &self,
        provider_key: &str,
        session: &mut dyn Session,
        provider_user_id: &str,
        next: Option<&str>,
    ) -> Result<String, OAuthError> {
        let user_id = session
            .authenticated_user()
            .ok_or(OAuthError::NotAuthenticated)?;

        let connection = self
            .connections
            .find_by_user_provider_remote_id(&user_id, provider_key, provider_user_id)
            .await?
            .ok_or_else(|| OAuthError::NotFound {
                provider_key: provider_key.to_string(),
                provider_user_id: provider_user_id.to_string(),
            })?;

        if !self.can_be_disconnected(&user_id).await? {
            warn!(
                provider = provider_key,
                user_id = %user_id,
                "refused to remove last oauth connection"
            );
            return Err(OAuthError::CannotDisconnect);
        }

        self.connections.delete(&connection).await?;
        info!(provider = provider_key, user_id = %user_id, "disconnected oauth identity");

        Ok(next.unwrap_or(DEFAULT_DISCONNECT_REDIRECT_URL).to_string())
    }

    pub async fn can_be_disconnected(&self, user_id: &UserId) -> Result<bool, OAuthError> {
        if self.users.has_usable_credential(user_id).await? {
            return Ok(true);
        }
        Ok(self.connections.count_for_user(user_id).await? > 1)
    }

    pub async fn refresh_access_token(&self, connection: &mut Connection) -> Result<(), OAuthError> {
        let provider = self.registry.get(&connection.provider_key)?;
        let refreshed = provider.refresh_token(&connection.token()).await?;

        connection.set_token_fields(&refreshed);
        *connection = self
            .connections
            .create_or_update(ConnectionUpsert::from(&*connection))
            .await?;
        debug!(connection = %connection, "refreshed oauth access token");
        Ok(())
    }

    pub async fn check_configuration(&self) -> Result<Option<ConfigDrift>, OAuthError> {
        let stored: BTreeSet<String> = self.connections.provider_keys().await?;
        let drift = check_provider_keys(&stored, &self.config);
        if let Some(drift) = &drift {
            warn!(missing = ?drift.missing_keys, "oauth configuration drift");
        }
        Ok(drift)
    }
}

fn signup_username(identity: &RemoteIdentity) -> String {
    match identity.username.as_deref() {
        Some(username) if !username.is_empty() => username.to_string(),
        _ => identity
            .email
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}
