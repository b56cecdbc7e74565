use std::sync::Arc;

use actix_web::{Responder, delete, get, patch, post, web};
use common::{error::Res, http::Success, jwt::JwtClaims};
use limiter::gate::UsageGate;
use rag::ingest::Ingestor;
use serde_json::json;
use sqlx::PgPool;

use crate::{
    dtos::{
        chat::RenameRequest,
        file::{FileIdQuery, UploadRequest},
    },
    service,
};

/// Uploads documents into the caller's knowledge base.
///
/// Every stored chunk costs one upload credit. Free users are refused when
/// the batch would use up their remaining credits.
///
/// # Input
/// - `req.files`: `[{ "name", "content" }]` with markdown or plain text content
///
/// # Output
/// - `{"documents": [...], "credits_used"}` with the new credit total
/// - 401 `limit_reached`, 413 when a file exceeds 50 MB
///
/// # Frontend Example
/// ```javascript
/// const response = await fetch('/api/app/file', {
///   method: 'POST',
///   headers: {
///     'Authorization': `Bearer ${token}`,
///     'Content-Type': 'application/json'
///   },
///   body: JSON.stringify({ files: [{ name: 'manual.md', content: markdown }] })
/// });
/// ```
#[post("")]
pub async fn post_file(
    claims: web::ReqData<JwtClaims>,
    gate: web::Data<Arc<UsageGate>>,
    ingestor: web::Data<Arc<Ingestor>>,
    req: web::Json<UploadRequest>,
) -> Res<impl Responder> {
    let uploaded = service::file::upload(&gate, &ingestor, claims.user_id, req.into_inner()).await?;
    Success::created(uploaded)
}

#[patch("")]
pub async fn patch_file(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
    query: web::Query<FileIdQuery>,
    req: web::Json<RenameRequest>,
) -> Res<impl Responder> {
    let file = service::file::rename_file(&pool, claims.user_id, query.id, &req.new_name).await?;
    Success::ok(file)
}

/// Deletes a document with its chunks and returns the caller's credit total
/// after the release.
#[delete("")]
pub async fn delete_file(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
    query: web::Query<FileIdQuery>,
) -> Res<impl Responder> {
    let credits_used = service::file::delete_file(&pool, claims.user_id, query.id).await?;
    Success::ok(json!({ "credits_used": credits_used }))
}

#[get("/files")]
pub async fn get_files(
    claims: web::ReqData<JwtClaims>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let files = service::file::list_files(&pool, claims.user_id).await?;
    Success::ok(files)
}
