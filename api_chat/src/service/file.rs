use common::{
    error::{AppError, Res},
    plan::UsageKind,
};
use db::{document, models::document::DocumentSummary, user};
use limiter::gate::UsageGate;
use rag::ingest::Ingestor;
use sqlx::PgPool;
use uuid::Uuid;

use crate::dtos::file::{MAX_UPLOAD_SIZE, UploadRequest, UploadResponse};

/// Rejects empty batches and oversized files before any work is done.
pub fn validate_upload(req: &UploadRequest) -> Res<()> {
    if req.files.is_empty() {
        return Err(AppError::BadRequest("No files provided".to_string()));
    }
    if let Some(file) = req.files.iter().find(|f| f.content.len() > MAX_UPLOAD_SIZE) {
        return Err(AppError::PayloadTooLarge(format!("{} is too large", file.name)));
    }
    Ok(())
}

/// Splits every file, admits the batch against the upload credits it costs,
/// then stores it. Credits are recorded for the documents actually stored.
pub async fn upload(
    gate: &UsageGate,
    ingestor: &Ingestor,
    user_id: Uuid,
    req: UploadRequest,
) -> Res<UploadResponse> {
    validate_upload(&req)?;

    let prepared: Vec<_> = req
        .files
        .iter()
        .map(|f| ingestor.prepare(&f.name, &f.content))
        .collect();
    let requested: i64 = prepared.iter().map(|p| p.credits()).sum();
    if requested == 0 {
        return Err(AppError::BadRequest("Files have no content".to_string()));
    }

    let user = gate
        .check_and_admit(user_id, UsageKind::UploadCredit, requested)
        .await?;

    let mut documents = Vec::with_capacity(prepared.len());
    let mut failure = None;
    for doc in prepared {
        match ingestor.ingest(user_id, doc).await {
            Ok(stored) => documents.push(stored),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let stored_credits: i64 = documents.iter().map(|d| d.chunks).sum();
    let credits_used = if stored_credits > 0 {
        gate.record(&user, UsageKind::UploadCredit, stored_credits)
            .await?
    } else {
        user.credits_used
    };

    if let Some(e) = failure {
        log::error!(
            "Upload for {} stopped after {} documents: {}",
            user_id,
            documents.len(),
            e
        );
        return Err(e);
    }

    log::info!("{} documents uploaded by {}", documents.len(), user_id);
    Ok(UploadResponse {
        documents,
        credits_used,
    })
}

pub async fn rename_file(
    pool: &PgPool,
    user_id: Uuid,
    file_id: Uuid,
    name: &str,
) -> Res<DocumentSummary> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("File name cannot be empty".to_string()));
    }
    document::rename_document(pool, file_id, user_id, name).await
}

/// Deletes the document and gives its upload credits back.
pub async fn delete_file(pool: &PgPool, user_id: Uuid, file_id: Uuid) -> Res<i64> {
    let mut tx = pool.begin().await?;
    let chunks = document::delete_document(&mut *tx, file_id, user_id).await?;
    let credits_used = user::release_credits(&mut *tx, user_id, chunks).await?;
    tx.commit().await?;

    log::info!("Document {} deleted, {} credits released", file_id, chunks);
    Ok(credits_used)
}

pub async fn list_files(pool: &PgPool, user_id: Uuid) -> Res<Vec<DocumentSummary>> {
    document::get_documents_by_user_id(pool, user_id).await
}
