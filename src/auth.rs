use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    clock::ClockState,
    error::{AppError, AppResult},
    models::Role,
};

/// Claims
///
/// Payload of a session token. Signed with the server secret (HS256) and validated on
/// every admin request. Nothing about the session is stored server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the identity id.
    pub sub: Uuid,
    /// Username at issuance, carried so audit lines can name the actor without a lookup.
    pub name: String,
    /// Role at issuance. Decoding fails for values outside the closed role set.
    pub role: Role,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds). Checked against the injected clock.
    pub exp: i64,
}

/// A freshly issued token and the instant it stops being accepted.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// TokenService
///
/// Issues and validates stateless session tokens. Validity is a pure function of the
/// signature and the expiry: there is no replay cache and no revocation list.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    clock: ClockState,
}

impl TokenService {
    pub fn new(secret: &str, ttl: std::time::Duration, clock: ClockState) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::days(1)),
            clock,
        }
    }

    /// issue
    ///
    /// Builds and signs claims for `id` with `role`, expiring one TTL from now.
    pub fn issue(&self, id: Uuid, username: &str, role: Role) -> AppResult<IssuedToken> {
        let now = self.clock.now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: id,
            name: username.to_string(),
            role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))?;

        Ok(IssuedToken {
            token,
            issued_at: now,
            expires_at,
        })
    }

    /// validate
    ///
    /// Verifies signature and structure, then rejects the token if the clock has
    /// reached its expiry. Every failure collapses to `Unauthenticated`.
    pub fn validate(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared with the injected clock below, not the library's wall clock.
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| {
                tracing::debug!(reason = ?e.kind(), "token rejected");
                AppError::Unauthenticated
            })?
            .claims;

        if self.clock.now().timestamp() >= claims.exp {
            tracing::debug!(sub = %claims.sub, "token expired");
            return Err(AppError::Unauthenticated);
        }

        Ok(claims)
    }
}

/// authorize
///
/// The access control gate. Allows iff `subject >= required` under the role order.
pub fn authorize(subject: Role, required: Role) -> AppResult<()> {
    if subject >= required {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// AuthUser
///
/// The resolved identity of an authenticated request, decoded from the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

impl AuthUser {
    /// Runs the gate for this subject, logging denials.
    pub fn require(&self, required: Role) -> AppResult<()> {
        authorize(self.role, required).inspect_err(|_| {
            tracing::warn!(
                actor_id = %self.id,
                role = %self.role,
                required = %required,
                "access denied"
            );
        })
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            username: claims.name,
            role: claims.role,
        }
    }
}

/// AuthUser Extractor Implementation
///
/// 1. Reuses an `AuthUser` already resolved by the admin middleware for this request.
/// 2. Otherwise reads `Authorization: Bearer <token>` and validates it.
///
/// Rejection: `AppError::Unauthenticated` for a missing, malformed, forged or expired token.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenService: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AppError::Unauthenticated)?;

        let tokens = TokenService::from_ref(state);
        let user = AuthUser::from(tokens.validate(token)?);
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}
