//! 检索后端抽象：查询文本 → 按相关度排序的段落

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 后端返回的段落
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub source: String,
    pub text: String,
    pub score: f32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("retrieval backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

/// 检索后端 trait：返回至多 k 条段落
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn embed_search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError>;
}
