use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use common::error::{AppError, Res};
use db::models::user::User;
use sqlx::PgPool;

use crate::dtos::auth::{LoginRequest, MIN_PASSWORD_LENGTH, RegisterRequest};

pub fn hash_password(password: &str) -> Res<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> Res<bool> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|e| AppError::Internal(format!("Stored password hash is invalid: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn validate_registration(req: &RegisterRequest) -> Res<()> {
    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("Email is not valid".to_string()));
    }
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("Name is required".to_string()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Password must have at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Checks email and password. Unknown emails and wrong passwords answer the
/// same error.
pub async fn authenticate_user(pool: &PgPool, login_data: &LoginRequest) -> Res<User> {
    let invalid = || AppError::Unauthorized("Invalid credentials".to_string());

    let credentials = db::user::get_password_hash_by_email(pool, login_data.email.trim())
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&login_data.password, &credentials.password_hash)? {
        return Err(invalid());
    }
    db::user::get_user_by_id(pool, credentials.user_id).await
}
