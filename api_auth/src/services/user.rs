use api_subs::services::reconcile::ReconciliationService;
use common::error::{AppError, Res};
use db::{
    dtos::user::UserCreateRequest,
    models::user::{AuthCredentials, User},
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    dtos::auth::{ProfileResponse, RegisterRequest},
    services::auth,
};

/// Inserts the user and their credentials in one transaction, then creates
/// the billing customer. A billing failure does not undo the registration;
/// the customer is created again on the first plan change.
pub async fn create_user_with_credentials(
    pool: &PgPool,
    reconciliation: &ReconciliationService,
    req: &RegisterRequest,
) -> Res<User> {
    auth::validate_registration(req)?;
    let email = req.email.trim().to_lowercase();

    if db::user::exists_user_by_email(pool, &email).await? {
        return Err(AppError::Conflict("Email is already registered".to_string()));
    }

    let password_hash = auth::hash_password(&req.password)?;

    let mut tx = pool.begin().await?;
    let user = db::user::insert_user(
        &mut *tx,
        UserCreateRequest {
            email,
            name: req.name.trim().to_string(),
        },
    )
    .await?;
    db::user::insert_user_with_credentials(
        &mut *tx,
        AuthCredentials {
            user_id: user.id,
            password_hash,
        },
    )
    .await?;
    tx.commit().await?;

    if let Err(e) = reconciliation.ensure_customer(user.id).await {
        log::warn!("Billing customer for {} not created: {}", user.id, e);
    }

    log::info!("User {} registered", user.id);
    Ok(user)
}

pub async fn get_profile(
    pool: &PgPool,
    reconciliation: &ReconciliationService,
    user_id: Uuid,
) -> Res<ProfileResponse> {
    let user = db::user::get_user_by_id(pool, user_id).await?;
    let limits = reconciliation.config().limits.limits(user.plan);
    let subscription = reconciliation.current_snapshot(user_id).await?;
    Ok(ProfileResponse {
        user,
        limits,
        subscription,
    })
}

/// Cancels billing first; the user row is only removed once the provider
/// confirmed the cancellation.
pub async fn delete_account(
    pool: &PgPool,
    reconciliation: &ReconciliationService,
    user_id: Uuid,
) -> Res<()> {
    reconciliation.close_account(user_id).await?;
    db::user::delete_user(pool, user_id).await?;
    log::info!("User {} deleted", user_id);
    Ok(())
}
