//! Admin authentication for the back-office routes.
//!
//! Admin requests carry `Authorization: Bearer <JWT>` signed with the configured
//! HS256 secret. Checkout-facing routes are public and never touch this module.

use crate::errors::ServiceError;
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ADMIN_ROLE: &str = "admin";

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
}

/// Signs and verifies admin tokens
pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Issues a token for `sub`; used by operators' tooling and tests
    pub fn issue(&self, sub: &str, roles: &[&str], ttl: Duration) -> Result<String, ServiceError> {
        let claims = Claims {
            sub: sub.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("Failed to sign token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ServiceError::Unauthorized("Token expired".into())
                }
                _ => ServiceError::Unauthorized("Invalid token".into()),
            })
    }
}

/// Extractor for routes that require the `admin` role
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub subject: String,
    pub roles: Vec<String>,
}

impl AdminUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    Arc<JwtAuth>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<JwtAuth>::from_ref(state);
        let token = bearer_token(parts)
            .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".into()))?;

        let claims = auth.verify(token).map_err(|e| {
            debug!(error = %e, "admin token rejected");
            e
        })?;

        let user = AdminUser {
            subject: claims.sub,
            roles: claims.roles,
        };
        if !user.has_role(ADMIN_ROLE) {
            warn!(subject = %user.subject, "non-admin token on admin route");
            return Err(ServiceError::Forbidden("Admin role required".into()));
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::Request;

    const SECRET: &str = "a-test-secret-that-is-long-enough-123";

    fn parts_with(token: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/orders");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn admin_token_is_accepted() {
        let auth = Arc::new(JwtAuth::new(SECRET));
        let token = auth.issue("ops@store", &["admin"], Duration::minutes(5)).unwrap();
        let mut parts = parts_with(Some(&token));

        let user = AdminUser::from_request_parts(&mut parts, &auth).await.unwrap();
        assert_eq!(user.subject, "ops@store");
    }

    #[tokio::test]
    async fn missing_or_foreign_tokens_are_unauthorized() {
        let auth = Arc::new(JwtAuth::new(SECRET));
        let mut parts = parts_with(None);
        assert_matches!(
            AdminUser::from_request_parts(&mut parts, &auth).await,
            Err(ServiceError::Unauthorized(_))
        );

        let other = JwtAuth::new("another-secret-that-is-also-long-enough");
        let token = other.issue("x", &["admin"], Duration::minutes(5)).unwrap();
        let mut parts = parts_with(Some(&token));
        assert_matches!(
            AdminUser::from_request_parts(&mut parts, &auth).await,
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[tokio::test]
    async fn expired_token_is_unauthorized() {
        let auth = Arc::new(JwtAuth::new(SECRET));
        let token = auth.issue("ops", &["admin"], Duration::hours(-2)).unwrap();
        let mut parts = parts_with(Some(&token));
        assert_matches!(
            AdminUser::from_request_parts(&mut parts, &auth).await,
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[tokio::test]
    async fn non_admin_is_forbidden() {
        let auth = Arc::new(JwtAuth::new(SECRET));
        let token = auth.issue("courier", &["delivery"], Duration::minutes(5)).unwrap();
        let mut parts = parts_with(Some(&token));
        assert_matches!(
            AdminUser::from_request_parts(&mut parts, &auth).await,
            Err(ServiceError::Forbidden(_))
        );
    }
}
