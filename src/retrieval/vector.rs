//! 向量索引：通过 EmbeddingProvider 编码块，检索时按余弦相似度排序

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::EmbeddingProvider;
use crate::retrieval::backend::{Passage, RetrievalError, SearchBackend};
use crate::retrieval::chunker::{Chunk, Chunker, ChunkingConfig};
use crate::retrieval::index::{collect_documents, DocumentInfo};

#[derive(Default)]
struct VectorData {
    documents: Vec<DocumentInfo>,
    entries: Vec<(Chunk, Vec<f32>)>,
}

pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    data: RwLock<VectorData>,
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: ChunkingConfig) -> Self {
        Self {
            embedder,
            chunker: Chunker::new(config),
            data: RwLock::new(VectorData::default()),
        }
    }

    /// 先完成全部嵌入再写入索引；任一块嵌入失败则整篇不写入
    pub async fn index_document(
        &self,
        source: &str,
        text: &str,
        metadata: Option<Value>,
    ) -> Result<usize, RetrievalError> {
        if text.trim().is_empty() {
            return Err(RetrievalError::InvalidDocument(format!("{source}: empty text")));
        }
        let chunks = self.chunker.chunk(source, text);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() || vectors.iter().any(Vec::is_empty) {
            return Err(RetrievalError::Unavailable("incomplete embeddings".to_string()));
        }
        let embedded: Vec<(Chunk, Vec<f32>)> = chunks.into_iter().zip(vectors).collect();
        let count = embedded.len();

        let mut data = self
            .data
            .write()
            .map_err(|_| RetrievalError::Unavailable("index lock poisoned".to_string()))?;
        data.entries.retain(|(c, _)| c.source != source);
        data.documents.retain(|d| d.source != source);
        data.entries.extend(embedded);
        data.documents.push(DocumentInfo {
            source: source.to_string(),
            chunks: count,
            metadata,
        });
        Ok(count)
    }

    /// 递归索引目录（与 KeywordIndex::index_directory 相同的文件选择规则）
    pub async fn index_directory(&self, dir: impl AsRef<Path>, extensions: &[&str]) -> Result<usize, RetrievalError> {
        let mut indexed = 0;
        for doc in collect_documents(dir.as_ref(), extensions)? {
            match self.index_document(&doc.source, &doc.text, Some(doc.metadata)).await {
                Ok(_) => indexed += 1,
                Err(RetrievalError::InvalidDocument(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(indexed)
    }

    pub fn list_documents(&self) -> Vec<DocumentInfo> {
        self.data
            .read()
            .map(|d| d.documents.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut data) = self.data.write() {
            *data = VectorData::default();
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchBackend for VectorIndex {
    async fn embed_search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let q = self.embedder.embed(query).await?;
        let data = self
            .data
            .read()
            .map_err(|_| RetrievalError::Unavailable("index lock poisoned".to_string()))?;
        let mut scored: Vec<Passage> = data
            .entries
            .iter()
            .map(|(chunk, emb)| Passage {
                source: chunk.source.clone(),
                text: chunk.text.clone(),
                score: cosine_similarity(&q, emb),
            })
            .filter(|p| p.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
