use std::sync::Arc;

use common::error::{AppError, Res};
use db::{
    document,
    dtos::document::{ChunkCreateRequest, DocumentCreateRequest},
    models::document::DocumentSummary,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{embedder::Embedder, splitter::TextSplitter};

/// A document split and ready to be stored. `credits()` is what the upload costs.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDocument {
    pub name: String,
    pub content: String,
    pub chunks: Vec<String>,
}

impl PreparedDocument {
    pub fn credits(&self) -> i64 {
        self.chunks.len() as i64
    }
}

pub struct Ingestor {
    pool: Arc<PgPool>,
    embedder: Arc<dyn Embedder>,
    splitter: TextSplitter,
}

impl Ingestor {
    pub fn new(pool: Arc<PgPool>, embedder: Arc<dyn Embedder>, splitter: TextSplitter) -> Self {
        Ingestor {
            pool,
            embedder,
            splitter,
        }
    }

    pub fn prepare(&self, name: &str, content: &str) -> PreparedDocument {
        PreparedDocument {
            name: name.to_string(),
            content: content.to_string(),
            chunks: self.splitter.split(content),
        }
    }

    /// Embeds every chunk, then stores the document and its chunks in one
    /// transaction.
    pub async fn ingest(&self, user_id: Uuid, prepared: PreparedDocument) -> Res<DocumentSummary> {
        let embeddings = self.embedder.embed_documents(&prepared.chunks).await?;
        if embeddings.len() != prepared.chunks.len() {
            return Err(AppError::Internal(format!(
                "{} embeddings for {} chunks",
                embeddings.len(),
                prepared.chunks.len()
            )));
        }

        let mut tx = self.pool.begin().await?;
        let stored = document::insert_document(
            &mut *tx,
            DocumentCreateRequest {
                user_id,
                name: prepared.name.clone(),
                content: prepared.content.clone(),
                chunks: prepared.credits(),
            },
        )
        .await?;

        for (content, embedding) in prepared.chunks.iter().zip(embeddings.iter()) {
            document::insert_chunk(
                &mut *tx,
                ChunkCreateRequest {
                    document_id: stored.id,
                    user_id,
                    content,
                    embedding,
                },
            )
            .await?;
        }
        tx.commit().await?;

        log::info!(
            "Document {} stored for {} with {} chunks",
            stored.id,
            user_id,
            stored.chunks
        );
        Ok(DocumentSummary {
            id: stored.id,
            name: stored.name,
            chunks: stored.chunks,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credits_equal_chunk_count() {
        let prepared = PreparedDocument {
            name: "notas.md".into(),
            content: String::new(),
            chunks: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(prepared.credits(), 3);
    }

    #[tokio::test]
    async fn prepare_splits_with_configured_splitter() {
        let pool = PgPool::connect_lazy("postgres://localhost/jarvas_test").unwrap();
        let ingestor = Ingestor::new(
            Arc::new(pool),
            Arc::new(crate::embedder::MockEmbedder::new()),
            TextSplitter::new(20, 0),
        );

        let prepared = ingestor.prepare("doc.md", "# One\nfirst part\n# Two\nsecond part");
        assert_eq!(prepared.name, "doc.md");
        assert_eq!(prepared.chunks, vec!["# One\nfirst part", "# Two\nsecond part"]);
        assert_eq!(prepared.credits(), 2);
    }
}
