//! Retrieval pipeline: chunking, knowledge base construction and search, and answer generation.

pub mod answer;
pub mod chunking;
pub mod knowledge;
pub mod types;

pub use answer::{answer, build_prompt};
pub use chunking::{PAGE_SEPARATOR, chunk_text, join_pages};
pub use knowledge::{KnowledgeBase, cosine_similarity};
pub use types::{
    Answer, AnswerError, BuildError, BuildOptions, ChunkingError, RetrievedChunk, SearchError,
};
