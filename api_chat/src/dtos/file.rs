use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest accepted document, in bytes.
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Files already converted to markdown text by the client.
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub documents: Vec<db::models::document::DocumentSummary>,
    pub credits_used: i64,
}

#[derive(Debug, Deserialize)]
pub struct FileIdQuery {
    pub id: Uuid,
}
