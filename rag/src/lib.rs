pub mod assistant;
pub mod embedder;
pub mod ingest;
pub mod retriever;
pub mod splitter;
