//! Log in with OAuth 2.0 providers.
//!
//! Users sign up or log in through a configured provider, attach further
//! provider identities to their account, and detach them again as long as
//! some way to log in remains. Storage and sessions are supplied by the
//! application through the [`ConnectionStore`], [`UserStore`] and [`Session`]
//! traits.

mod config;
mod error;
mod flow;
mod http;
mod provider;
mod providers;
mod registry;
pub mod state;
pub mod store;
mod types;

pub use config::{ConfigDrift, LoginConfig, ProviderSettings, check_provider_keys};
pub use error::{ErrorResponse, OAuthError, UpstreamError};
pub use flow::{CallbackKind, CallbackOutcome, FlowController, FlowStage};
pub use http::{ProviderHttp, TokenEndpoint};
pub use provider::OAuthProvider;
pub use providers::{BitbucketProvider, GitHubProvider, GitLabProvider};
pub use registry::{AdapterFactories, ProviderFactory, ProviderRegistry};
pub use state::{MemorySession, Session, SessionKey};
pub use store::memory::MemoryStore;
pub use store::{ConnectionStore, StoreError, UserStore, normalize_email};
pub use types::{
    CallbackParams, Connection, ConnectionUpsert, OAuthToken, RemoteIdentity, TokenResponse, User,
    UserId,
};
