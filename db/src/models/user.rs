use chrono::NaiveDateTime;
use common::plan::{Plan, UsageKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub plan: Plan,
    pub messages_used: i64,
    pub credits_used: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn used(&self, kind: UsageKind) -> i64 {
        match kind {
            UsageKind::Message => self.messages_used,
            UsageKind::UploadCredit => self.credits_used,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AuthCredentials {
    pub user_id: Uuid,
    pub password_hash: String,
}
