//! Persistence contracts the flows depend on.
//!
//! Implementations must enforce uniqueness of `(provider_key,
//! provider_user_id)` and of user email at the storage layer, atomically with
//! the write. The flows never re-check either constraint themselves.
//!
//! The two stores are written separately. A signup creates the user first and
//! the connection second, so a connection write that loses a uniqueness race
//! leaves the new user without a connection. The error is returned and no
//! session is logged in; stores that need signup to be all-or-nothing should
//! back both traits with one transaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{Connection, ConnectionUpsert, User, UserId};

pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("uniqueness constraint violated: {0}")]
    Uniqueness(String),

    #[error("{0}")]
    Backend(String),
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn find_by_provider_and_remote_id(
        &self,
        provider_key: &str,
        provider_user_id: &str,
    ) -> Result<Option<Connection>, StoreError>;

    async fn find_by_user_provider_remote_id(
        &self,
        user_id: &UserId,
        provider_key: &str,
        provider_user_id: &str,
    ) -> Result<Option<Connection>, StoreError>;

    /// Upsert keyed by `(user_id, provider_key, provider_user_id)`; fails
    /// with [`StoreError::Uniqueness`] when another user owns the identity.
    async fn create_or_update(&self, connection: ConnectionUpsert)
    -> Result<Connection, StoreError>;

    async fn delete(&self, connection: &Connection) -> Result<(), StoreError>;

    async fn count_for_user(&self, user_id: &UserId) -> Result<usize, StoreError>;

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Connection>, StoreError>;

    async fn provider_keys(&self) -> Result<BTreeSet<String>, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, username: &str, email: &str) -> Result<User, StoreError>;

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError>;

    /// A password or any other login that doesn't need a connection.
    async fn has_usable_credential(&self, user_id: &UserId) -> Result<bool, StoreError>;

    fn normalize_email(&self, email: &str) -> String {
        normalize_email(email)
    }
}

#[async_trait]
impl<T: ConnectionStore + ?Sized> ConnectionStore for Arc<T> {
    async fn find_by_provider_and_remote_id(
        &self,
        provider_key: &str,
        provider_user_id: &str,
    ) -> Result<Option<Connection>, StoreError> {
        (**self)
            .find_by_provider_and_remote_id(provider_key, provider_user_id)
            .await
    }

    async fn find_by_user_provider_remote_id(
        &self,
        user_id: &UserId,
        provider_key: &str,
        provider_user_id: &str,
    ) -> Result<Option<Connection>, StoreError> {
        (**self)
            .find_by_user_provider_remote_id(user_id, provider_key, provider_user_id)
            .await
    }

    async fn create_or_update(
        &self,
        connection: ConnectionUpsert,
    ) -> Result<Connection, StoreError> {
        (**self).create_or_update(connection).await
    }

    async fn delete(&self, connection: &Connection) -> Result<(), StoreError> {
        (**self).delete(connection).await
    }

    async fn count_for_user(&self, user_id: &UserId) -> Result<usize, StoreError> {
        (**self).count_for_user(user_id).await
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Connection>, StoreError> {
        (**self).list_for_user(user_id).await
    }

    async fn provider_keys(&self) -> Result<BTreeSet<String>, StoreError> {
        (**self).provider_keys().await
    }
}

#[async_trait]
impl<T: UserStore + ?Sized> UserStore for Arc<T> {
    async fn create_user(&self, username: &str, email: &str) -> Result<User, StoreError> {
        (**self).create_user(username, email).await
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError> {
        (**self).get_user(user_id).await
    }

    async fn has_usable_credential(&self, user_id: &UserId) -> Result<bool, StoreError> {
        (**self).has_usable_credential(user_id).await
    }

    fn normalize_email(&self, email: &str) -> String {
        (**self).normalize_email(email)
    }
}

/// Lower-cases the domain part, leaving the local part untouched.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_lowercase()),
        None => email.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_email;

    #[test]
    fn lower_cases_domain() {
        assert_eq!(normalize_email("Dummy@ExAmPlE.com"), "Dummy@example.com");
        assert_eq!(normalize_email(" user@Example.ORG "), "user@example.org");
        assert_eq!(normalize_email("not-an-email"), "not-an-email");
    }
}
