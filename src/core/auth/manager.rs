// src/core/auth/manager.rs

//! The auth manager: user registry, password hashing, token facade, and the
//! RBAC permission check. Verification failures are announced as `auth`
//! events so the audit trail shows every rejected credential.

use crate::core::auth::rbac::RoleSet;
use crate::core::auth::token::{Claims, TokenKind, TokenService};
use crate::core::errors::EdgeLinkError;
use crate::core::events::EventBus;
use crate::core::models::{EventCategory, EventSeverity};
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

pub struct AuthManager {
    users: RwLock<HashMap<String, UserRecord>>,
    /// `username` -> `user_id`, so login does not scan the registry.
    username_index: RwLock<HashMap<String, String>>,
    roles: RwLock<RoleSet>,
    tokens: TokenService,
    bus: Arc<EventBus>,
}

impl AuthManager {
    pub fn new(
        secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            username_index: RwLock::new(HashMap::new()),
            roles: RwLock::new(RoleSet::default()),
            tokens: TokenService::new(secret, access_ttl, refresh_ttl),
            bus,
        }
    }

    /// Registers a user with a freshly salted password hash. Duplicate user
    /// ids or usernames are rejected.
    pub fn register_user(
        &self,
        user_id: &str,
        username: &str,
        password: &str,
        role: &str,
    ) -> Result<(), EdgeLinkError> {
        {
            let users = self.users.read();
            if users.contains_key(user_id) {
                return Err(EdgeLinkError::UserExists(user_id.to_string()));
            }
        }
        if self.username_index.read().contains_key(username) {
            return Err(EdgeLinkError::UserExists(username.to_string()));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| EdgeLinkError::Internal("password hashing failed".to_string()))?
            .to_string();

        let record = UserRecord {
            user_id: user_id.to_string(),
            username: username.to_string(),
            password_hash,
            role: role.to_string(),
            created_at: Utc::now(),
        };

        self.users.write().insert(user_id.to_string(), record);
        self.username_index
            .write()
            .insert(username.to_string(), user_id.to_string());

        info!(user_id, username, role, "User registered.");
        Ok(())
    }

    /// Verifies a username/password pair. Returns the user id on success.
    pub fn authenticate_user(&self, username: &str, password: &str) -> Option<String> {
        let user_id = self.username_index.read().get(username).cloned()?;
        let password_hash = self
            .users
            .read()
            .get(&user_id)
            .map(|u| u.password_hash.clone())?;

        let parsed = PasswordHash::new(&password_hash).ok()?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
        {
            Some(user_id)
        } else {
            None
        }
    }

    pub fn get_user(&self, user_id: &str) -> Option<UserRecord> {
        self.users.read().get(user_id).cloned()
    }

    /// Signs an access/refresh token pair for a just-authenticated user. The
    /// refresh token is bound to the presenting device.
    pub fn issue_token_pair(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<(String, String), EdgeLinkError> {
        let role = self
            .get_user(user_id)
            .map(|u| u.role)
            .ok_or_else(|| EdgeLinkError::UnknownUser(user_id.to_string()))?;
        let access = self.tokens.issue_access(user_id, &role)?;
        let refresh = self.tokens.issue_refresh(user_id, &role, device_id)?;
        Ok((access, refresh))
    }

    /// Signs a token with an explicit TTL. A non-positive TTL produces a
    /// token that can never verify.
    pub fn create_token(
        &self,
        user_id: &str,
        role: &str,
        kind: TokenKind,
        ttl_secs: i64,
    ) -> Result<String, EdgeLinkError> {
        self.tokens.issue(user_id, role, kind, ttl_secs, None)
    }

    /// Verifies a token, emitting a WARN `auth` event on failure. The event
    /// carries the token's claimed user id when the payload is decodable.
    pub fn verify_token(
        &self,
        token: &str,
        expected: TokenKind,
        trace_id: &str,
    ) -> Option<Claims> {
        match self.tokens.verify(token, expected) {
            Ok(claims) => Some(claims),
            Err(e) => {
                let claimed = self.tokens.claims_unverified(token);
                let claimed_user = claimed.as_ref().map(|c| c.user_id.clone());
                warn!(trace_id, error = %e, "Token verification failed.");
                self.bus.emit(
                    "auth.token_rejected",
                    trace_id,
                    EventSeverity::Warn,
                    EventCategory::Auth,
                    format!("token verification failed: {e}"),
                    json!({ "user_id": claimed_user }),
                );
                None
            }
        }
    }

    /// Exchanges a valid refresh token for a fresh access token.
    pub fn refresh_access_token(
        &self,
        refresh_token: &str,
        trace_id: &str,
    ) -> Option<String> {
        let claims = self.verify_token(refresh_token, TokenKind::Refresh, trace_id)?;
        self.tokens
            .issue_access(&claims.user_id, &claims.role)
            .ok()
    }

    /// Deletes the user's refresh tokens; access tokens expire on their own.
    pub fn revoke_refresh(&self, user_id: &str, device_id: Option<&str>) -> usize {
        self.tokens.revoke_refresh(user_id, device_id)
    }

    /// Resolves user -> role -> permission set and evaluates the action.
    pub fn check_permission(&self, user_id: &str, action: &str, resource: Option<&str>) -> bool {
        let Some(role) = self.users.read().get(user_id).map(|u| u.role.clone()) else {
            warn!(user_id, action, "Permission check for unknown user.");
            return false;
        };
        let allowed = self.roles.read().permits(&role, action);
        if !allowed {
            warn!(user_id, role, action, resource, "Permission denied.");
        }
        allowed
    }

    /// Adds or replaces a role definition at runtime.
    pub fn define_role(&self, name: &str, permissions: Vec<String>) {
        self.roles.write().define_role(name, permissions);
    }

    pub fn token_service(&self) -> &TokenService {
        &self.tokens
    }
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("users", &self.users.read().len())
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
