use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub content: String,
    pub chunks: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Document listing entry without the stored text.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub name: String,
    pub chunks: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct RelevantChunk {
    pub content: String,
    pub similarity: f64,
}
