use actix_web::{HttpMessage, dev::ServiceRequest};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    env_config::JwtConfig,
    error::{AppError, Res},
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub user_id: Uuid,
    pub exp: usize,
}

/// Generates JWT token for the given user and JWT configuration options
pub fn generate_jwt(user_id: Uuid, config: &JwtConfig) -> Res<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(config.expiration_hours))
        .ok_or_else(|| AppError::Internal("JWT expiration overflow".to_string()))?
        .timestamp();

    let claims = JwtClaims {
        user_id,
        exp: expiration as usize,
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(AppError::from)
}

/// Extracts claims object from JWT token.
/// Requires JWT secret.
pub fn validate_jwt(token: &str, secret: &str) -> Res<JwtClaims> {
    let token_data = jsonwebtoken::decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {e}")))?;
    Ok(token_data.claims)
}

/// Reads the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned)
}

/// Claims placed on the request by the auth middleware.
pub fn get_jwt_claims(req: &ServiceRequest) -> Res<JwtClaims> {
    req.extensions()
        .get::<JwtClaims>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("No authorization token provided".to_string()))
}
