use std::sync::Arc;

use actix_web::{Responder, delete, get, patch, post, web};
use common::{error::Res, http::Success, jwt::JwtClaims};
use limiter::gate::UsageGate;
use rag::assistant::Assistant;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    dtos::chat::{ChatIdQuery, ChatRequest, RenameRequest},
    service,
};

/// Sends a message to the assistant.
///
/// The chat is created on first use, titled after the opening message. Free
/// users over their monthly message allowance are refused.
///
/// # Input
/// - `req.id`: chat id chosen by the client
/// - `req.messages`: conversation so far, ending with the new user message
///
/// # Output
/// - `{"chat_id", "role": "assistant", "content"}`
/// - 400 when no user message is present, 401 `limit_reached` when the free
///   allowance is spent, 504 when the assistant does not answer in time
///
/// # Frontend Example
/// ```javascript
/// const response = await fetch('/api/app/chat', {
///   method: 'POST',
///   headers: {
///     'Authorization': `Bearer ${token}`,
///     'Content-Type': 'application/json'
///   },
///   body: JSON.stringify({ id: chatId, messages })
/// });
///
/// if (response.status === 401) {
///   const { reason } = await response.json();
///   if (reason === 'limit_reached') showUpgrade();
/// }
/// ```
#[post("")]
pub async fn post_chat(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
    gate: web::Data<Arc<UsageGate>>,
    assistant: web::Data<Arc<Assistant>>,
    req: web::Json<ChatRequest>,
) -> Res<impl Responder> {
    let reply =
        service::chat::send_message(&pool, &gate, &assistant, claims.user_id, req.into_inner())
            .await?;
    Success::ok(reply)
}

/// Renames a chat of the caller.
#[patch("")]
pub async fn patch_chat(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
    query: web::Query<ChatIdQuery>,
    req: web::Json<RenameRequest>,
) -> Res<impl Responder> {
    let chat = service::chat::rename_chat(&pool, claims.user_id, query.id, &req.new_name).await?;
    Success::ok(chat)
}

#[delete("")]
pub async fn delete_chat(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
    query: web::Query<ChatIdQuery>,
) -> Res<impl Responder> {
    service::chat::delete_chat(&pool, claims.user_id, query.id).await?;
    Success::no_content()
}

/// Messages of a chat, oldest first.
#[get("/{id}/messages")]
pub async fn get_messages(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    let messages = service::chat::get_messages(&pool, claims.user_id, path.into_inner()).await?;
    Success::ok(messages)
}

/// Chats of the caller, most recently active first.
#[get("/conversations")]
pub async fn get_conversations(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let chats = service::chat::get_conversations(&pool, claims.user_id).await?;
    Success::ok(chats)
}

#[cfg(test)]
mod tests {
    use actix_web::{App, HttpMessage, http::StatusCode, test};
    use api_subs::services::{cache::MockSnapshotCache, stripe::MockBillingProvider};
    use chrono::Utc;
    use common::{
        env_config::BillingConfig,
        plan::{BillingItems, Plan, PlanCatalog, PlanLimitsTable},
    };
    use db::{ledger::MockUsageLedger, models::user::User};
    use limiter::notifier::MockNotifier;
    use rag::{assistant::MockChatModel, retriever::MockKnowledgeBase};

    use super::*;

    fn billing_config() -> BillingConfig {
        let items = || BillingItems {
            base: "b".into(),
            uploads: "u".into(),
            messages: "m".into(),
        };
        BillingConfig {
            limits: PlanLimitsTable::default(),
            catalog: PlanCatalog {
                starter: items(),
                pro: items(),
                enterprise: items(),
            },
            warn_threshold: 0.9,
            redirect_base_url: "http://localhost:3000".into(),
        }
    }

    fn free_user(messages_used: i64) -> User {
        let now = Utc::now().naive_utc();
        User {
            id: Uuid::new_v4(),
            email: "rui@example.com".into(),
            name: "Rui".into(),
            plan: Plan::Free,
            messages_used,
            credits_used: 0,
            created_at: now,
            updated_at: now,
        }
    }

    async fn post(ledger: MockUsageLedger, body: serde_json::Value) -> actix_web::dev::ServiceResponse {
        let mut model = MockChatModel::new();
        model.expect_complete().never();

        let gate = UsageGate::new(
            Arc::new(ledger),
            Arc::new(MockBillingProvider::new()),
            Arc::new(MockSnapshotCache::new()),
            Arc::new(MockNotifier::new()),
            billing_config(),
        );
        let assistant = Assistant::new(Arc::new(model), Arc::new(MockKnowledgeBase::new()));
        let pool = PgPool::connect_lazy("postgres://localhost/jarvas_test").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Arc::new(pool)))
                .app_data(web::Data::new(Arc::new(gate)))
                .app_data(web::Data::new(Arc::new(assistant)))
                .service(web::scope("/chat").service(post_chat)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(body)
            .to_request();
        req.extensions_mut().insert(JwtClaims {
            user_id: Uuid::new_v4(),
            exp: usize::MAX,
        });
        test::call_service(&app, req).await
    }

    #[actix_web::test]
    async fn missing_user_message_is_a_bad_request() {
        let mut ledger = MockUsageLedger::new();
        ledger.expect_get_user().never();

        let body = serde_json::json!({
            "id": Uuid::new_v4(),
            "messages": [{ "role": "assistant", "content": "Olá" }]
        });
        assert_eq!(post(ledger, body).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn spent_free_allowance_reports_limit_reached() {
        let mut ledger = MockUsageLedger::new();
        ledger.expect_get_user().returning(|_| Ok(free_user(50)));
        ledger.expect_increment_usage().never();

        let body = serde_json::json!({
            "id": Uuid::new_v4(),
            "messages": [{ "role": "user", "content": "Mais uma pergunta" }]
        });
        let resp = post(ledger, body).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["reason"], "limit_reached");
    }
}
