// src/core/auth/token.rs

//! HS256 JWT issuance and verification, plus the server-side refresh-token
//! registry.
//!
//! Access tokens are short-lived and stateless. Refresh tokens are
//! device-bound and recorded by `jti` in the registry; revoking a refresh
//! token deletes its registry entry, and the outstanding access tokens age
//! out within their short TTL.

use crate::core::errors::EdgeLinkError;
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// The claims carried by every token this service signs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
struct RefreshRecord {
    user_id: String,
    device_id: String,
    expires_at: i64,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    /// Registered refresh tokens by `jti`.
    refresh_registry: DashMap<String, RefreshRecord>,
}

// Manual implementation: the signing keys intentionally have no `Debug`.
impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("refresh_registry", &self.refresh_registry.len())
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
            refresh_registry: DashMap::new(),
        }
    }

    /// Signs a token of the given kind with an explicit TTL in seconds. A
    /// non-positive TTL produces an already-expired token.
    pub fn issue(
        &self,
        user_id: &str,
        role: &str,
        kind: TokenKind,
        ttl_secs: i64,
        device_id: Option<&str>,
    ) -> Result<String, EdgeLinkError> {
        let now = Utc::now().timestamp();
        let jti = Uuid::new_v4().to_string();
        let claims = Claims {
            user_id: user_id.to_string(),
            role: role.to_string(),
            kind,
            device_id: device_id.map(str::to_string),
            jti: jti.clone(),
            iat: now,
            exp: now + ttl_secs,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        if kind == TokenKind::Refresh {
            let device_id = device_id.unwrap_or_default().to_string();
            self.refresh_registry.insert(
                jti,
                RefreshRecord {
                    user_id: user_id.to_string(),
                    device_id,
                    expires_at: claims.exp,
                },
            );
        }
        Ok(token)
    }

    /// Signs an access token with the configured TTL.
    pub fn issue_access(&self, user_id: &str, role: &str) -> Result<String, EdgeLinkError> {
        self.issue(
            user_id,
            role,
            TokenKind::Access,
            self.access_ttl.as_secs() as i64,
            None,
        )
    }

    /// Signs a device-bound refresh token with the configured TTL and records
    /// it in the registry.
    pub fn issue_refresh(
        &self,
        user_id: &str,
        role: &str,
        device_id: &str,
    ) -> Result<String, EdgeLinkError> {
        self.issue(
            user_id,
            role,
            TokenKind::Refresh,
            self.refresh_ttl.as_secs() as i64,
            Some(device_id),
        )
    }

    /// Verifies a token's signature, expiry (no leeway), and kind. Refresh
    /// tokens must additionally still be present in the registry.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, EdgeLinkError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        let claims = data.claims;

        if claims.kind != expected {
            return Err(EdgeLinkError::TokenRejected(
                "token type mismatch".to_string(),
            ));
        }
        if expected == TokenKind::Refresh && !self.refresh_registry.contains_key(&claims.jti) {
            return Err(EdgeLinkError::TokenRejected(
                "refresh token revoked or unknown".to_string(),
            ));
        }
        Ok(claims)
    }

    /// Decodes claims without verifying the signature or expiry. Used only to
    /// attribute rejected tokens in audit events.
    pub fn claims_unverified(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.set_required_spec_claims::<&str>(&[]);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .ok()
            .map(|d| d.claims)
    }

    /// Deletes every refresh token registered for a user, or only those bound
    /// to one device. Returns how many were revoked.
    pub fn revoke_refresh(&self, user_id: &str, device_id: Option<&str>) -> usize {
        let before = self.refresh_registry.len();
        self.refresh_registry.retain(|_, record| {
            !(record.user_id == user_id
                && device_id.is_none_or(|d| record.device_id == d))
        });
        before - self.refresh_registry.len()
    }

    /// Drops registry entries whose refresh tokens have expired on their own.
    pub fn prune_expired_refresh(&self) -> usize {
        let now = Utc::now().timestamp();
        let before = self.refresh_registry.len();
        self.refresh_registry
            .retain(|_, record| record.expires_at > now);
        before - self.refresh_registry.len()
    }

    pub fn refresh_registry_len(&self) -> usize {
        self.refresh_registry.len()
    }
}
