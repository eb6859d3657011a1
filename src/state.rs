//! Anti-CSRF state for the redirect round trip, and the narrow session
//! capability the flows need.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{OAuthError, User, UserId};

const STATE_BYTES: usize = 32;
const FINGERPRINT_HEX_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// Pending state of the single in-flight flow.
    State,
    Next,
}

impl SessionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKey::State => "oauth_login_state",
            SessionKey::Next => "oauth_login_next",
        }
    }
}

pub trait Session: Send {
    fn get(&self, key: SessionKey) -> Option<String>;
    fn set(&mut self, key: SessionKey, value: String);
    fn pop(&mut self, key: SessionKey) -> Option<String>;

    fn authenticated_user(&self) -> Option<UserId>;

    fn login(&mut self, user: &User);
}

#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    values: HashMap<SessionKey, String>,
    user: Option<UserId>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authenticated(user_id: UserId) -> Self {
        Self {
            values: HashMap::new(),
            user: Some(user_id),
        }
    }
}

impl Session for MemorySession {
    fn get(&self, key: SessionKey) -> Option<String> {
        self.values.get(&key).cloned()
    }

    fn set(&mut self, key: SessionKey, value: String) {
        self.values.insert(key, value);
    }

    fn pop(&mut self, key: SessionKey) -> Option<String> {
        self.values.remove(&key)
    }

    fn authenticated_user(&self) -> Option<UserId> {
        self.user.clone()
    }

    fn login(&mut self, user: &User) {
        self.user = Some(user.id.clone());
    }
}

pub fn generate_state() -> Result<String, OAuthError> {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| OAuthError::OsRng {
            message: err.to_string(),
        })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Replaces any state already pending for this session.
pub fn store_state(session: &mut dyn Session, state: &str) {
    session.set(SessionKey::State, state.to_string());
}

/// Consumes the pending state whatever the outcome, so a state value can be
/// checked at most once.
pub fn verify_state(session: &mut dyn Session, supplied: Option<&str>) -> Result<(), OAuthError> {
    let expected = session.pop(SessionKey::State);
    match (expected, supplied) {
        (Some(expected), Some(supplied))
            if bool::from(expected.as_bytes().ct_eq(supplied.as_bytes())) =>
        {
            Ok(())
        }
        _ => Err(OAuthError::StateMismatch),
    }
}

pub fn state_fingerprint(state: &str) -> String {
    let digest = Sha256::digest(state.as_bytes());
    let mut hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex.truncate(FINGERPRINT_HEX_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_long_url_safe_states() {
        let first = generate_state().unwrap();
        let second = generate_state().unwrap();
        assert!(first.len() >= 32);
        assert_ne!(first, second);
        for value in [&first, &second] {
            assert!(!value.contains('='), "state should be unpadded");
            assert!(!value.contains('+'), "state should be url safe");
            assert!(!value.contains('/'), "state should be url safe");
        }
    }

    #[test]
    fn verify_consumes_pending_state() {
        let mut session = MemorySession::new();
        store_state(&mut session, "abc");

        verify_state(&mut session, Some("abc")).unwrap();
        assert!(session.get(SessionKey::State).is_none());
        assert!(matches!(
            verify_state(&mut session, Some("abc")),
            Err(OAuthError::StateMismatch)
        ));
    }

    #[test]
    fn mismatch_still_consumes_state() {
        let mut session = MemorySession::new();
        store_state(&mut session, "abc");

        assert!(matches!(
            verify_state(&mut session, Some("abd")),
            Err(OAuthError::StateMismatch)
        ));
        assert!(matches!(
            verify_state(&mut session, Some("abc")),
            Err(OAuthError::StateMismatch)
        ));
    }

    #[test]
    fn missing_state_is_a_mismatch() {
        let mut session = MemorySession::new();
        assert!(verify_state(&mut session, Some("abc")).is_err());

        store_state(&mut session, "abc");
        assert!(verify_state(&mut session, None).is_err());
    }

    #[test]
    fn later_flow_overwrites_pending_state() {
        let mut session = MemorySession::new();
        store_state(&mut session, "first");
        store_state(&mut session, "second");

        assert!(verify_state(&mut session, Some("first")).is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        assert_eq!(state_fingerprint("abc"), state_fingerprint("abc"));
        assert_eq!(state_fingerprint("abc").len(), 12);
        assert_ne!(state_fingerprint("abc"), "abc");
    }
}
