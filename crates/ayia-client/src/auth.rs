//! User-service authentication flows.
//!
//! Every flow keeps the [`IdentityStore`](crate::IdentityStore) and the
//! change-notification subscription in step with the outcome: success sets
//! the identity and subscribes, failure clears it and unsubscribes.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::connection::Connection;
use crate::error::AuthError;
use crate::identity::AuthUser;
use crate::manager::{ConnectionManager, ManagerInner};

/// Register a new user.
pub const METHOD_REGISTER: &str = "user.register";

/// Authenticate with a user name and password hash.
pub const METHOD_AUTH_PASSWORD: &str = "user.authPassword";

/// Exchange a current token for a fresh one.
pub const METHOD_AUTH_REFRESH: &str = "user.authRefresh";

/// Invalidate a token.
pub const METHOD_AUTH_REVOKE: &str = "user.authRevoke";

/// Lowercase hex SHA-256 of `password`, the form the user service expects.
pub fn password_hash(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn decode_user(value: Value) -> Result<AuthUser, AuthError> {
    serde_json::from_value(value)
        .map_err(|e| AuthError::rejected(format!("malformed user record: {}", e)))
}

impl ConnectionManager {
    /// Register `user_name`. A returned user record becomes the identity.
    pub async fn register_user(
        &self,
        user_name: &str,
        password_hash: &str,
    ) -> Result<Option<AuthUser>, AuthError> {
        let conn = self.get_connection().await?;
        let params = json!({"user_name": user_name, "password_hash": password_hash});
        let result = conn.call(METHOD_REGISTER, params).await?;

        if !truthy(&result) {
            return Ok(None);
        }
        let user = decode_user(result)?;
        tracing::info!(user = %user.user_name, "user registered");
        self.identity().set(Some(user.clone()));
        Ok(Some(user))
    }

    /// Authenticate with a password hash.
    ///
    /// Returns the cached identity without a call if it already belongs to
    /// `user_name`.
    pub async fn auth_password(
        &self,
        user_name: &str,
        password_hash: &str,
    ) -> Result<AuthUser, AuthError> {
        let conn = self.get_connection().await?;
        if let Some(user) = self.identity().get() {
            if user.user_name == user_name {
                return Ok(user);
            }
        }

        let params = json!({"user_name": user_name, "password_hash": password_hash});
        let outcome = conn.call(METHOD_AUTH_PASSWORD, params).await;
        self.inner()
            .settle_auth(&conn, outcome.map_err(AuthError::from), "password authentication")
            .await
    }

    /// Refresh the credentials of `user`.
    pub async fn auth_refresh(&self, user: &AuthUser) -> Result<AuthUser, AuthError> {
        let conn = self.get_connection().await?;
        self.inner().refresh_on(&conn, user).await
    }

    /// Revoke the current credentials. Succeeds without a call when nobody
    /// is authenticated.
    pub async fn auth_revoke(&self) -> Result<bool, AuthError> {
        let conn = self.get_connection().await?;
        let user = match self.identity().get() {
            Some(user) => user,
            None => return Ok(true),
        };

        let params = json!({"token": user.bearer_token()});
        let result = conn.call(METHOD_AUTH_REVOKE, params).await.map_err(|e| {
            tracing::error!(user = %user.user_name, error = %e, "revoke failed");
            AuthError::from(e)
        })?;

        if !truthy(&result) {
            return Err(AuthError::rejected("revoke refused"));
        }

        tracing::info!(user = %user.user_name, "credentials revoked");
        self.identity().clear();
        self.unsubscribe_changes(&conn).await;
        Ok(true)
    }
}

impl ManagerInner {
    /// Refresh `user` over `conn` directly. The open hook uses this on the
    /// connection being opened, which `get_connection` would wait on.
    pub(crate) async fn refresh_on(
        &self,
        conn: &Connection,
        user: &AuthUser,
    ) -> Result<AuthUser, AuthError> {
        tracing::debug!(connection = conn.id(), user = %user.user_name, "refreshing credentials");
        let params = json!({"token": user.bearer_token()});
        let outcome = conn.call(METHOD_AUTH_REFRESH, params).await;
        self.settle_auth(conn, outcome.map_err(AuthError::from), "credential refresh")
            .await
    }

    /// Apply the outcome of an authentication call.
    async fn settle_auth(
        &self,
        conn: &Connection,
        outcome: Result<Value, AuthError>,
        flow: &str,
    ) -> Result<AuthUser, AuthError> {
        let user = match outcome {
            Ok(value) if truthy(&value) => decode_user(value),
            Ok(_) => Err(AuthError::rejected(format!("{} refused", flow))),
            Err(e) => Err(e),
        };

        match user {
            Ok(user) => {
                tracing::info!(connection = conn.id(), user = %user.user_name, "{} succeeded", flow);
                self.identity.set(Some(user.clone()));
                self.subscribe_changes(conn).await;
                Ok(user)
            }
            Err(e) => {
                tracing::error!(connection = conn.id(), code = e.code, error = %e.message, "{} failed", flow);
                self.identity.clear();
                self.unsubscribe_changes(conn).await;
                Err(e)
            }
        }
    }
}
