//! JWT verification service.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::core_types::UserId;
use crate::error::{DuelError, DuelResult};

/// Claims the external auth provider signs into each bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    /// Expiry, seconds since epoch.
    pub exp: usize,
}

/// Caller identity injected into request extensions by the middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
        }
    }

    /// Validate a bearer token and extract the caller identity.
    pub fn verify_token(&self, token: &str) -> DuelResult<AuthenticatedUser> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "token verification failed");
            DuelError::Unauthenticated
        })?;
        Ok(AuthenticatedUser {
            user_id: data.claims.sub,
        })
    }

    /// Sign a token for a user. The production issuer is the external auth
    /// provider; this is used by the dev-token endpoint and tests.
    pub fn issue_token(&self, user_id: &str, ttl_secs: i64) -> DuelResult<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now().timestamp() + ttl_secs) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| DuelError::invalid(format!("token signing failed: {e}")))
    }
}
