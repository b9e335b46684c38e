//! JWT authentication for identity-provider tokens.
//!
//! The identity provider signs HS256 tokens whose `sub` is the user's uid
//! and which may carry the user's email. `AuthUser` validates the
//! `Authorization: Bearer <token>` header on protected routes.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use courier_common::error::AppError;
use courier_common::types::UserIdentity;

use crate::state::AppState;

/// JWT claims stored in the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject: the user's uid
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiration time (UNIX timestamp)
    pub exp: i64,
    /// Issued at (UNIX timestamp)
    pub iat: i64,
}

/// Authenticated user extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity: UserIdentity,
    pub claims: Claims,
}

/// Encode a JWT for a user.
pub fn encode_jwt(
    identity: &UserIdentity,
    secret: &str,
    expiry_hours: u64,
) -> Result<String, AppError> {
    let now = Utc::now();
    let exp = now + Duration::hours(expiry_hours as i64);

    let claims = Claims {
        sub: identity.uid.clone(),
        email: identity.email.clone(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Auth(format!("Failed to encode JWT: {}", e)))
}

/// Decode and validate a JWT.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

    Ok(token_data.claims)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let secret = state.config.jwt_secret.clone();

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        async move {
            let Some(token) = auth_header
                .as_deref()
                .and_then(|h| h.strip_prefix("Bearer "))
            else {
                return Err(AppError::Auth(
                    "Missing or invalid Authorization header. Use 'Bearer <JWT>'".to_string(),
                ));
            };

            let claims = decode_jwt(token, &secret)?;
            if claims.sub.trim().is_empty() {
                return Err(AppError::Auth("Token has no subject".to_string()));
            }

            Ok(AuthUser {
                identity: UserIdentity {
                    uid: claims.sub.clone(),
                    email: claims.email.clone(),
                },
                claims,
            })
        }
    }
}
