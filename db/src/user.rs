use common::{
    error::{AppError, Res},
    plan::{Plan, UsageKind},
};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{
    dtos::user::UserCreateRequest,
    models::user::{AuthCredentials, User},
};

const USER_COLUMNS: &str =
    "id, email, name, plan, messages_used, credits_used, created_at, updated_at";

pub async fn exists_user_by_email<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    email: &str,
) -> Res<bool> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(email)
        .fetch_one(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_user_by_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<User> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(user_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))
}

pub async fn insert_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: UserCreateRequest,
) -> Res<User> {
    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (email, name) VALUES ($1, $2) RETURNING {USER_COLUMNS}"
    ))
    .bind(data.email)
    .bind(data.name)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn insert_user_with_credentials<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: AuthCredentials,
) -> Res<()> {
    sqlx::query("INSERT INTO auth_credentials (user_id, password_hash) VALUES ($1, $2)")
        .bind(data.user_id)
        .bind(data.password_hash)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn get_password_hash_by_email<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    email: &str,
) -> Res<Option<AuthCredentials>> {
    sqlx::query_as::<_, AuthCredentials>(
        r#"
        SELECT ac.user_id, ac.password_hash
        FROM auth_credentials ac
        JOIN users u ON u.id = ac.user_id
        WHERE u.email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn update_plan<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    plan: Plan,
) -> Res<()> {
    let result = sqlx::query("UPDATE users SET plan = $1, updated_at = NOW() WHERE id = $2")
        .bind(plan)
        .bind(user_id)
        .execute(executor)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User {user_id} not found")));
    }
    Ok(())
}

fn usage_column(kind: UsageKind) -> &'static str {
    match kind {
        UsageKind::Message => "messages_used",
        UsageKind::UploadCredit => "credits_used",
    }
}

/// Adds `delta` to the counter in a single statement and returns the new total.
pub async fn increment_usage<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    kind: UsageKind,
    delta: i64,
) -> Res<i64> {
    let column = usage_column(kind);
    sqlx::query_scalar::<_, i64>(&format!(
        "UPDATE users SET {column} = {column} + $1, updated_at = NOW() WHERE id = $2 RETURNING {column}"
    ))
    .bind(delta)
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))
}

/// Gives back upload credits, never going below zero.
pub async fn release_credits<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    amount: i64,
) -> Res<i64> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE users SET credits_used = GREATEST(credits_used - $1, 0), updated_at = NOW() WHERE id = $2 RETURNING credits_used",
    )
    .bind(amount)
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))
}

pub async fn reset_usage<'e, E: Executor<'e, Database = Postgres>>(executor: E) -> Res<u64> {
    let result = sqlx::query(
        "UPDATE users SET messages_used = 0, credits_used = 0, updated_at = NOW()",
    )
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<()> {
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(())
}
