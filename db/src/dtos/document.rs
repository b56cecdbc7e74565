use uuid::Uuid;

pub struct DocumentCreateRequest {
    pub user_id: Uuid,
    pub name: String,
    pub content: String,
    pub chunks: i64,
}

pub struct ChunkCreateRequest<'a> {
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub content: &'a str,
    pub embedding: &'a [f32],
}
