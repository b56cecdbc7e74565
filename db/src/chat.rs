use common::error::{AppError, Res};
use sqlx::{Executor, Postgres, types::JsonValue};
use uuid::Uuid;

use crate::models::chat::{Chat, Message};

pub async fn get_chat<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    chat_id: Uuid,
    user_id: Uuid,
) -> Res<Option<Chat>> {
    sqlx::query_as::<_, Chat>(
        "SELECT id, user_id, title, created_at, updated_at FROM chats WHERE id = $1 AND user_id = $2",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_chats_by_user_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<Vec<Chat>> {
    sqlx::query_as::<_, Chat>(
        "SELECT id, user_id, title, created_at, updated_at FROM chats WHERE user_id = $1 ORDER BY updated_at DESC",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

/// Creates the chat. Returns `None` when the id is already taken.
pub async fn insert_chat<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    chat_id: Uuid,
    user_id: Uuid,
    title: &str,
) -> Res<Option<Chat>> {
    sqlx::query_as::<_, Chat>(
        r#"
        INSERT INTO chats (id, user_id, title)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        RETURNING id, user_id, title, created_at, updated_at
        "#,
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(title)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn rename_chat<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    chat_id: Uuid,
    user_id: Uuid,
    title: &str,
) -> Res<Chat> {
    sqlx::query_as::<_, Chat>(
        r#"
        UPDATE chats SET title = $1, updated_at = NOW()
        WHERE id = $2 AND user_id = $3
        RETURNING id, user_id, title, created_at, updated_at
        "#,
    )
    .bind(title)
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Chat {chat_id} not found")))
}

pub async fn touch_chat<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    chat_id: Uuid,
) -> Res<()> {
    sqlx::query("UPDATE chats SET updated_at = NOW() WHERE id = $1")
        .bind(chat_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn delete_chat<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    chat_id: Uuid,
    user_id: Uuid,
) -> Res<()> {
    let result = sqlx::query("DELETE FROM chats WHERE id = $1 AND user_id = $2")
        .bind(chat_id)
        .bind(user_id)
        .execute(executor)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Chat {chat_id} not found")));
    }
    Ok(())
}

pub async fn get_messages_by_chat_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    chat_id: Uuid,
) -> Res<Vec<Message>> {
    sqlx::query_as::<_, Message>(
        "SELECT id, chat_id, role, content, created_at FROM messages WHERE chat_id = $1 ORDER BY created_at ASC",
    )
    .bind(chat_id)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

pub async fn insert_message<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    chat_id: Uuid,
    role: &str,
    content: JsonValue,
) -> Res<Message> {
    sqlx::query_as::<_, Message>(
        r#"
        INSERT INTO messages (chat_id, role, content)
        VALUES ($1, $2, $3)
        RETURNING id, chat_id, role, content, created_at
        "#,
    )
    .bind(chat_id)
    .bind(role)
    .bind(content)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}
