use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{
    dtos::document::{ChunkCreateRequest, DocumentCreateRequest},
    models::document::{Document, DocumentSummary, RelevantChunk},
};

/// Chunks scoring at or below this cosine similarity are not returned.
pub const SIMILARITY_THRESHOLD: f64 = 0.5;
pub const MAX_RELEVANT_CHUNKS: i64 = 5;

/// Renders an embedding in pgvector's text format, `[0.1,0.2,...]`.
pub fn to_vector_literal(embedding: &[f32]) -> String {
    let values: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", values.join(","))
}

pub async fn insert_document<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: DocumentCreateRequest,
) -> Res<Document> {
    sqlx::query_as::<_, Document>(
        r#"
        INSERT INTO documents (user_id, name, content, chunks)
        VALUES ($1, $2, $3, $4)
        RETURNING id, user_id, name, content, chunks, created_at, updated_at
        "#,
    )
    .bind(data.user_id)
    .bind(data.name)
    .bind(data.content)
    .bind(data.chunks)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn insert_chunk<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: ChunkCreateRequest<'_>,
) -> Res<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (document_id, user_id, content, embedding)
        VALUES ($1, $2, $3, $4::vector)
        "#,
    )
    .bind(data.document_id)
    .bind(data.user_id)
    .bind(data.content)
    .bind(to_vector_literal(data.embedding))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_documents_by_user_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<Vec<DocumentSummary>> {
    sqlx::query_as::<_, DocumentSummary>(
        "SELECT id, name, chunks, created_at, updated_at FROM documents WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

pub async fn rename_document<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    document_id: Uuid,
    user_id: Uuid,
    name: &str,
) -> Res<DocumentSummary> {
    sqlx::query_as::<_, DocumentSummary>(
        r#"
        UPDATE documents SET name = $1, updated_at = NOW()
        WHERE id = $2 AND user_id = $3
        RETURNING id, name, chunks, created_at, updated_at
        "#,
    )
    .bind(name)
    .bind(document_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Document {document_id} not found")))
}

/// Deletes the document with its chunks and returns how many chunks it held.
pub async fn delete_document<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    document_id: Uuid,
    user_id: Uuid,
) -> Res<i64> {
    sqlx::query_scalar::<_, i64>(
        "DELETE FROM documents WHERE id = $1 AND user_id = $2 RETURNING chunks",
    )
    .bind(document_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Document {document_id} not found")))
}

/// Top chunks of the user's documents by cosine similarity to `embedding`.
pub async fn find_similar_chunks<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    embedding: &[f32],
) -> Res<Vec<RelevantChunk>> {
    sqlx::query_as::<_, RelevantChunk>(
        r#"
        SELECT content, similarity FROM (
            SELECT content, (1 - (embedding <=> $1::vector))::float8 AS similarity
            FROM chunks
            WHERE user_id = $2
        ) scored
        WHERE similarity > $3
        ORDER BY similarity DESC
        LIMIT $4
        "#,
    )
    .bind(to_vector_literal(embedding))
    .bind(user_id)
    .bind(SIMILARITY_THRESHOLD)
    .bind(MAX_RELEVANT_CHUNKS)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_literal_matches_pgvector_text_format() {
        assert_eq!(to_vector_literal(&[0.5, -1.0, 0.25]), "[0.5,-1,0.25]");
        assert_eq!(to_vector_literal(&[]), "[]");
    }
}
