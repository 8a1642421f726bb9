//! Reactive store for the authenticated user.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

/// An authenticated user as returned by the user service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_name: String,
    pub token_type: String,
    pub access_token: String,
    /// Remaining user record fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthUser {
    /// Create a user without extra fields.
    pub fn new(
        user_name: impl Into<String>,
        token_type: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            token_type: token_type.into(),
            access_token: access_token.into(),
            extra: Map::new(),
        }
    }

    /// `Authorization`-style token: `"<token_type> <access_token>"`.
    pub fn bearer_token(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Holds "authenticated user or nobody" and notifies watchers on change.
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    tx: watch::Sender<Option<AuthUser>>,
}

impl IdentityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Current identity.
    pub fn get(&self) -> Option<AuthUser> {
        self.tx.borrow().clone()
    }

    /// Replace the identity.
    pub fn set(&self, user: Option<AuthUser>) {
        self.tx.send_replace(user);
    }

    /// Replace the identity with `f(current)`.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(Option<AuthUser>) -> Option<AuthUser>,
    {
        self.tx.send_modify(|current| *current = f(current.take()));
    }

    /// Clear the identity.
    pub fn clear(&self) {
        self.set(None);
    }

    /// Watch for identity changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.tx.subscribe()
    }
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new()
    }
}
