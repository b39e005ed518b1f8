//! 检索层：后端抽象、分块、分词、关键词索引与向量索引、带超时的上下文检索器

pub mod backend;
pub mod chunker;
pub mod index;
pub mod retriever;
pub mod tokenizer;
pub mod vector;

pub use backend::{Passage, RetrievalError, SearchBackend};
pub use chunker::{Chunk, Chunker, ChunkingConfig};
pub use index::{collect_documents, DocumentInfo, KeywordIndex, SourceDocument};
pub use retriever::{format_context, ContextChunk, ContextRetriever};
pub use vector::{cosine_similarity, VectorIndex};
