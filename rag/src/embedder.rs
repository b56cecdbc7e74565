use async_trait::async_trait;
use common::error::{AppError, Res};
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const EMBEDDING_DIMENSIONS: usize = 1536;

/// Inputs per embeddings request.
const BATCH_SIZE: usize = 256;

#[automock]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per text, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Res<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Res<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
}

impl OpenAiEmbedder {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        OpenAiEmbedder {
            client,
            api_key: api_key.into(),
        }
    }

    async fn embed_batch(&self, input: &[String]) -> Res<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", OPENAI_API_BASE))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: EMBEDDING_MODEL,
                input,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<EmbeddingResponse>()
            .await?;

        let mut data = response.data;
        if data.len() != input.len() {
            return Err(AppError::Internal(format!(
                "Expected {} embeddings, received {}",
                input.len(),
                data.len()
            )));
        }
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Res<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        log::debug!("Embedded {} chunks", vectors.len());
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Res<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal("No embedding returned for query".to_string()))
    }
}
