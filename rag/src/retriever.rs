use std::sync::Arc;

use async_trait::async_trait;
use common::error::Res;
use db::{document, models::document::RelevantChunk};
use mockall::automock;
use sqlx::PgPool;
use uuid::Uuid;

use crate::embedder::Embedder;

/// Semantic search over a user's own documents.
#[automock]
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn find_relevant_content(&self, user_id: Uuid, query: &str) -> Res<Vec<RelevantChunk>>;
}

pub struct Retriever {
    pool: Arc<PgPool>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(pool: Arc<PgPool>, embedder: Arc<dyn Embedder>) -> Self {
        Retriever { pool, embedder }
    }
}

#[async_trait]
impl KnowledgeBase for Retriever {
    async fn find_relevant_content(&self, user_id: Uuid, query: &str) -> Res<Vec<RelevantChunk>> {
        let embedding = self.embedder.embed_query(query).await?;
        let chunks = document::find_similar_chunks(&*self.pool, user_id, &embedding).await?;
        log::debug!("{} chunks relevant for user {}", chunks.len(), user_id);
        Ok(chunks)
    }
}
