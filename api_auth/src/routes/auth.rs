use std::sync::Arc;

use actix_web::{Responder, post, web};
use api_subs::services::reconcile::ReconciliationService;
use common::{env_config::Config, error::Res, http::Success, jwt};
use sqlx::PgPool;

use crate::{
    dtos::auth::{AuthResponse, LoginRequest, RegisterRequest},
    services,
};

/// Registers a new user with email and password authentication.
///
/// # Input
/// - `req`: JSON payload with `email`, `password` (8+ characters) and `name`
///
/// # Output
/// - Success: the created user with 201 Created status, on the free plan
/// - Error: 400 for invalid input, 409 if the email is already registered
///
/// # Frontend Example
/// ```javascript
/// const response = await fetch('/api/auth/register', {
///   method: 'POST',
///   headers: {
///     'Content-Type': 'application/json'
///   },
///   body: JSON.stringify({
///     email: 'user@example.com',
///     password: 'securepassword',
///     name: 'Ana Silva'
///   })
/// });
/// ```
#[post("/register")]
pub async fn post_register(
    req: web::Json<RegisterRequest>,
    pool: web::Data<Arc<PgPool>>,
    reconciliation: web::Data<Arc<ReconciliationService>>,
) -> Res<impl Responder> {
    let user =
        services::user::create_user_with_credentials(&pool, &reconciliation, &req.into_inner())
            .await?;
    Success::created(user)
}

/// Authenticates a user with email and password.
///
/// # Input
/// - `login_data`: JSON payload containing email and password
///
/// # Output
/// - Success: `{"token", "user"}`; the token goes in the `Authorization` header
/// - Error: 401 Unauthorized for invalid credentials
///
/// # Frontend Example
/// ```javascript
/// const response = await fetch('/api/auth/login', {
///   method: 'POST',
///   headers: {
///     'Content-Type': 'application/json'
///   },
///   body: JSON.stringify({
///     email: 'user@example.com',
///     password: 'securepassword'
///   })
/// });
///
/// if (response.ok) {
///   const authData = await response.json();
///   localStorage.setItem('authToken', authData.token);
/// }
/// ```
#[post("/login")]
pub async fn post_login(
    login_data: web::Json<LoginRequest>,
    config: web::Data<Arc<Config>>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let user = services::auth::authenticate_user(&pool, &login_data.into_inner()).await?;
    let token = jwt::generate_jwt(user.id, &config.jwt_config)?;
    log::info!("User {} logged in", user.id);
    Success::ok(AuthResponse { token, user })
}
