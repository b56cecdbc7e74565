use common::{
    error::{AppError, Res},
    plan::UsageKind,
};
use db::{
    chat,
    models::{
        chat::{Chat, Message},
        user::User,
    },
};
use limiter::gate::UsageGate;
use rag::assistant::Assistant;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::dtos::chat::{ChatReply, ChatRequest, chat_title};

/// Stores the user's message, asks the assistant and stores its answer.
/// The message is counted only once a reply was produced.
pub async fn send_message(
    pool: &PgPool,
    gate: &UsageGate,
    assistant: &Assistant,
    user_id: Uuid,
    req: ChatRequest,
) -> Res<ChatReply> {
    let question = req
        .last_user_message()
        .ok_or_else(|| AppError::BadRequest("No user message found".to_string()))?
        .content
        .clone();

    let user = gate.check_and_admit(user_id, UsageKind::Message, 1).await?;

    if chat::get_chat(pool, req.id, user_id).await?.is_none() {
        chat::insert_chat(pool, req.id, user_id, &chat_title(&question))
            .await?
            .ok_or_else(|| AppError::Forbidden("Chat belongs to another user".to_string()))?;
        log::info!("Chat {} created for {}", req.id, user_id);
    }

    chat::insert_message(pool, req.id, "user", json!(question)).await?;

    let reply = assistant.reply(user_id, req.history()).await?;

    chat::insert_message(pool, req.id, "assistant", json!(reply.text)).await?;
    chat::touch_chat(pool, req.id).await?;
    count_message(gate, &user).await;

    Ok(ChatReply {
        chat_id: req.id,
        role: "assistant",
        content: reply.text,
    })
}

/// The reply is already stored, so a failed increment must not turn it
/// into an error the client would retry.
async fn count_message(gate: &UsageGate, user: &User) {
    if let Err(e) = gate.record(user, UsageKind::Message, 1).await {
        log::error!("Answered message of {} was not counted: {}", user.id, e);
    }
}

pub async fn rename_chat(pool: &PgPool, user_id: Uuid, chat_id: Uuid, name: &str) -> Res<Chat> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Chat name cannot be empty".to_string()));
    }
    chat::rename_chat(pool, chat_id, user_id, name).await
}

pub async fn delete_chat(pool: &PgPool, user_id: Uuid, chat_id: Uuid) -> Res<()> {
    chat::delete_chat(pool, chat_id, user_id).await?;
    log::info!("Chat {} deleted by {}", chat_id, user_id);
    Ok(())
}

pub async fn get_messages(pool: &PgPool, user_id: Uuid, chat_id: Uuid) -> Res<Vec<Message>> {
    chat::get_chat(pool, chat_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Chat {chat_id} not found")))?;
    chat::get_messages_by_chat_id(pool, chat_id).await
}

pub async fn get_conversations(pool: &PgPool, user_id: Uuid) -> Res<Vec<Chat>> {
    chat::get_chats_by_user_id(pool, user_id).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use api_subs::services::{cache::MockSnapshotCache, stripe::MockBillingProvider};
    use chrono::Utc;
    use common::{
        env_config::BillingConfig,
        plan::{BillingItems, Plan, PlanCatalog, PlanLimitsTable},
    };
    use db::ledger::MockUsageLedger;
    use limiter::notifier::MockNotifier;

    use super::*;

    fn gate(ledger: MockUsageLedger) -> UsageGate {
        let items = || BillingItems {
            base: "b".into(),
            uploads: "u".into(),
            messages: "m".into(),
        };
        UsageGate::new(
            Arc::new(ledger),
            Arc::new(MockBillingProvider::new()),
            Arc::new(MockSnapshotCache::new()),
            Arc::new(MockNotifier::new()),
            BillingConfig {
                limits: PlanLimitsTable::default(),
                catalog: PlanCatalog {
                    starter: items(),
                    pro: items(),
                    enterprise: items(),
                },
                warn_threshold: 0.9,
                redirect_base_url: "http://localhost:3000".into(),
            },
        )
    }

    #[tokio::test]
    async fn failed_message_count_does_not_fail_the_reply() {
        let now = Utc::now().naive_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: "rui@example.com".into(),
            name: "Rui".into(),
            plan: Plan::Free,
            messages_used: 3,
            credits_used: 0,
            created_at: now,
            updated_at: now,
        };

        let mut ledger = MockUsageLedger::new();
        ledger
            .expect_increment_usage()
            .times(1)
            .returning(|_, _, _| Err(AppError::Internal("connection reset".into())));

        count_message(&gate(ledger), &user).await;
    }
}
