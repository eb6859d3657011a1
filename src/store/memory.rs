//! In-memory stores, for tests and single-process tools.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{ConnectionStore, StoreError, UserStore};
use crate::{Connection, ConnectionUpsert, User, UserId};

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    has_password: bool,
}

#[derive(Debug, Default)]
struct Tables {
    users: Vec<StoredUser>,
    connections: Vec<Connection>,
    next_user_id: u64,
}

/// Implements both store contracts over one lock, so each write checks its
/// uniqueness constraints atomically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    pub fn insert_user_with_password(
        &self,
        username: &str,
        email: &str,
    ) -> Result<User, StoreError> {
        self.insert_user(username, email, true)
    }

    fn insert_user(&self, username: &str, email: &str, has_password: bool) -> Result<User, StoreError> {
        let mut tables = self.lock()?;
        if tables.users.iter().any(|stored| stored.user.email == email) {
            return Err(StoreError::Uniqueness(format!("email {email} is taken")));
        }
        if tables.users.iter().any(|stored| stored.user.username == username) {
            return Err(StoreError::Uniqueness(format!("username {username} is taken")));
        }

        tables.next_user_id += 1;
        let user = User {
            id: UserId(tables.next_user_id.to_string()),
            username: username.to_string(),
            email: email.to_string(),
        };
        tables.users.push(StoredUser {
            user: user.clone(),
            has_password,
        });
        Ok(user)
    }

    pub fn user_count(&self) -> usize {
        self.lock().map(|tables| tables.users.len()).unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.lock().map(|tables| tables.connections.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn find_by_provider_and_remote_id(
        &self,
        provider_key: &str,
        provider_user_id: &str,
    ) -> Result<Option<Connection>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .connections
            .iter()
            .find(|c| c.provider_key == provider_key && c.provider_user_id == provider_user_id)
            .cloned())
    }

    async fn find_by_user_provider_remote_id(
        &self,
        user_id: &UserId,
        provider_key: &str,
        provider_user_id: &str,
    ) -> Result<Option<Connection>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .connections
            .iter()
            .find(|c| {
                &c.user_id == user_id
                    && c.provider_key == provider_key
                    && c.provider_user_id == provider_user_id
            })
            .cloned())
    }

    async fn create_or_update(
        &self,
        upsert: ConnectionUpsert,
    ) -> Result<Connection, StoreError> {
        let mut tables = self.lock()?;
        let now = Utc::now();

        let existing = tables.connections.iter_mut().find(|c| {
            c.provider_key == upsert.provider_key && c.provider_user_id == upsert.provider_user_id
        });

        match existing {
            Some(connection) if connection.user_id != upsert.user_id => {
                Err(StoreError::Uniqueness(format!(
                    "{}:{} is connected to another user",
                    upsert.provider_key, upsert.provider_user_id
                )))
            }
            Some(connection) => {
                connection.set_token_fields(&upsert.token);
                connection.updated_at = now;
                Ok(connection.clone())
            }
            None => {
                let connection = Connection {
                    user_id: upsert.user_id,
                    provider_key: upsert.provider_key,
                    provider_user_id: upsert.provider_user_id,
                    access_token: upsert.token.access_token,
                    refresh_token: upsert.token.refresh_token,
                    access_token_expires_at: upsert.token.access_token_expires_at,
                    refresh_token_expires_at: upsert.token.refresh_token_expires_at,
                    created_at: now,
                    updated_at: now,
                };
                tables.connections.push(connection.clone());
                Ok(connection)
            }
        }
    }

    async fn delete(&self, connection: &Connection) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        tables.connections.retain(|c| {
            !(c.provider_key == connection.provider_key
                && c.provider_user_id == connection.provider_user_id)
        });
        Ok(())
    }

    async fn count_for_user(&self, user_id: &UserId) -> Result<usize, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .connections
            .iter()
            .filter(|c| &c.user_id == user_id)
            .count())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Connection>, StoreError> {
        let tables = self.lock()?;
        let mut connections: Vec<Connection> = tables
            .connections
            .iter()
            .filter(|c| &c.user_id == user_id)
            .cloned()
            .collect();
        connections.sort_by(|a, b| a.provider_key.cmp(&b.provider_key));
        Ok(connections)
    }

    async fn provider_keys(&self) -> Result<BTreeSet<String>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .connections
            .iter()
            .map(|c| c.provider_key.clone())
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, username: &str, email: &str) -> Result<User, StoreError> {
        self.insert_user(username, email, false)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .users
            .iter()
            .find(|stored| &stored.user.id == user_id)
            .map(|stored| stored.user.clone()))
    }

    async fn has_usable_credential(&self, user_id: &UserId) -> Result<bool, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .users
            .iter()
            .any(|stored| &stored.user.id == user_id && stored.has_password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OAuthToken, RemoteIdentity};

    fn identity(id: &str) -> RemoteIdentity {
        RemoteIdentity {
            id: id.to_string(),
            username: None,
            email: "someone@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_rejects_identity_owned_by_another_user() {
        let store = MemoryStore::new();
        let alice = store.create_user("alice", "alice@example.com").await.unwrap();
        let bob = store.create_user("bob", "bob@example.com").await.unwrap();
        let token = OAuthToken::new("token");

        store
            .create_or_update(ConnectionUpsert::new(alice.id.clone(), "github", &identity("1"), &token))
            .await
            .unwrap();
        let result = store
            .create_or_update(ConnectionUpsert::new(bob.id.clone(), "github", &identity("1"), &token))
            .await;

        assert!(matches!(result, Err(StoreError::Uniqueness(_))));
        assert_eq!(store.count_for_user(&alice.id).await.unwrap(), 1);
        assert_eq!(store.count_for_user(&bob.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_updates_tokens_in_place() {
        let store = MemoryStore::new();
        let alice = store.create_user("alice", "alice@example.com").await.unwrap();

        let first = store
            .create_or_update(ConnectionUpsert::new(
                alice.id.clone(),
                "github",
                &identity("1"),
                &OAuthToken::new("old"),
            ))
            .await
            .unwrap();
        let second = store
            .create_or_update(ConnectionUpsert::new(
                alice.id.clone(),
                "github",
                &identity("1"),
                &OAuthToken::new("new"),
            ))
            .await
            .unwrap();

        assert_eq!(store.connection_count(), 1);
        assert_eq!(second.access_token, "new");
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_uniqueness_error() {
        let store = MemoryStore::new();
        store.insert_user_with_password("alice", "alice@example.com").unwrap();

        let result = store.create_user("alice2", "alice@example.com").await;
        assert!(matches!(result, Err(StoreError::Uniqueness(_))));
        assert_eq!(store.user_count(), 1);
    }
}
