use std::sync::Arc;

use actix_web::{Responder, delete, get, web};
use api_subs::services::reconcile::ReconciliationService;
use common::{error::Res, http::Success, jwt::JwtClaims};
use sqlx::PgPool;

use crate::services;

/// Profile of the authenticated user with the usage dashboard data.
///
/// # Output
/// - `user`: profile including `plan`, `messages_used` and `credits_used`
/// - `limits`: `{ "upload_credits", "messages" }` of the current plan
/// - `subscription`: cached subscription snapshot, `status: "none"` when absent
///
/// # Frontend Example
/// ```javascript
/// const response = await fetch('/api/app/me', {
///   headers: {
///     'Authorization': `Bearer ${localStorage.getItem('authToken')}`
///   }
/// });
///
/// const { user, limits } = await response.json();
/// const percent = Math.round((user.messages_used / limits.messages) * 100);
/// ```
#[get("/me")]
pub async fn get_me(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
    reconciliation: web::Data<Arc<ReconciliationService>>,
) -> Res<impl Responder> {
    let profile = services::user::get_profile(&pool, &reconciliation, claims.user_id).await?;
    Success::ok(profile)
}

/// Deletes the caller's account. Any live subscription is cancelled first;
/// nothing is deleted when the cancellation is not confirmed (502).
#[delete("/me")]
pub async fn delete_me(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
    reconciliation: web::Data<Arc<ReconciliationService>>,
) -> Res<impl Responder> {
    services::user::delete_account(&pool, &reconciliation, claims.user_id).await?;
    Success::no_content()
}
