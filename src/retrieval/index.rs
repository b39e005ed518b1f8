//! 关键词索引：文档分块后按词集合重叠打分
//!
//! score = |查询词 ∩ 块词| / |查询词|；同分按索引顺序排列。内部用 RwLock，可作为 Arc<dyn SearchBackend> 共享。

use std::collections::HashSet;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::retrieval::backend::{Passage, RetrievalError, SearchBackend};
use crate::retrieval::chunker::{Chunk, Chunker, ChunkingConfig};
use crate::retrieval::tokenizer::tokenize_to_set;

/// 已索引文档的描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub source: String,
    pub chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// 目录中读取到的一篇文档
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// 相对目录的路径（`/` 分隔）
    pub source: String,
    pub text: String,
    pub metadata: Value,
}

/// 递归读取目录下指定扩展名的文件，按路径排序；无法读取的文件跳过
pub fn collect_documents(dir: &Path, extensions: &[&str]) -> Result<Vec<SourceDocument>, RetrievalError> {
    if !dir.is_dir() {
        return Err(RetrievalError::InvalidDocument(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    let mut docs = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.trim_start_matches('.').eq_ignore_ascii_case(e)));
        if !matches {
            continue;
        }
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        let source = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        docs.push(SourceDocument {
            source,
            text,
            metadata: serde_json::json!({ "path": path.display().to_string() }),
        });
    }
    Ok(docs)
}

#[derive(Default)]
struct KeywordData {
    documents: Vec<DocumentInfo>,
    chunks: Vec<(Chunk, HashSet<String>)>,
}

pub struct KeywordIndex {
    chunker: Chunker,
    data: RwLock<KeywordData>,
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

fn poisoned<T>(_: T) -> RetrievalError {
    RetrievalError::Unavailable("index lock poisoned".to_string())
}

impl KeywordIndex {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            chunker: Chunker::new(config),
            data: RwLock::new(KeywordData::default()),
        }
    }

    /// 索引一篇文档；同名来源会被替换。返回块数
    pub fn index_document(
        &self,
        source: &str,
        text: &str,
        metadata: Option<Value>,
    ) -> Result<usize, RetrievalError> {
        if text.trim().is_empty() {
            return Err(RetrievalError::InvalidDocument(format!("{source}: empty text")));
        }
        let chunks: Vec<(Chunk, HashSet<String>)> = self
            .chunker
            .chunk(source, text)
            .into_iter()
            .map(|c| {
                let tokens = tokenize_to_set(&c.text);
                (c, tokens)
            })
            .collect();
        let count = chunks.len();

        let mut data = self.data.write().map_err(poisoned)?;
        data.chunks.retain(|(c, _)| c.source != source);
        data.documents.retain(|d| d.source != source);
        data.chunks.extend(chunks);
        data.documents.push(DocumentInfo {
            source: source.to_string(),
            chunks: count,
            metadata,
        });
        debug!(source, chunks = count, "document indexed");
        Ok(count)
    }

    /// 递归索引目录下指定扩展名的文本文件（按路径排序），返回成功索引的文档数
    pub fn index_directory(
        &self,
        dir: impl AsRef<Path>,
        extensions: &[&str],
    ) -> Result<usize, RetrievalError> {
        let dir = dir.as_ref();
        let mut indexed = 0;
        for doc in collect_documents(dir, extensions)? {
            match self.index_document(&doc.source, &doc.text, Some(doc.metadata)) {
                Ok(_) => indexed += 1,
                Err(RetrievalError::InvalidDocument(reason)) => {
                    debug!(%reason, "skipping empty file");
                }
                Err(e) => return Err(e),
            }
        }
        info!(dir = %dir.display(), documents = indexed, "directory indexed");
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
            *data = KeywordData::default();
        }
    }

    /// 块数
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.chunks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        let query_tokens = tokenize_to_set(query);
        if query_tokens.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let data = self.data.read().map_err(poisoned)?;
        let mut scored: Vec<Passage> = data
            .chunks
            .iter()
            .filter_map(|(chunk, tokens)| {
                let overlap = query_tokens.intersection(tokens).count();
                (overlap > 0).then(|| Passage {
                    source: chunk.source.clone(),
                    text: chunk.text.clone(),
                    score: overlap as f32 / query_tokens.len() as f32,
                })
            })
            .collect();
        // sort_by 是稳定排序：同分保持索引顺序
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

#[async_trait]
impl SearchBackend for KeywordIndex {
    async fn embed_search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        self.search(query, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> KeywordIndex {
        let idx = KeywordIndex::default();
        idx.index_document("rust.md", "Rust is a systems programming language.", None)
            .unwrap();
        idx.index_document("python.md", "Python is a scripting language.", None)
            .unwrap();
        idx.index_document("cats.md", "Cats sleep most of the day.", None)
            .unwrap();
        idx
    }

    #[tokio::test]
    async fn test_search_ranks_by_overlap() {
        let idx = index();
        let hits = idx.embed_search("rust programming language", 3).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source, "rust.md");
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].source, "python.md");
    }

    #[tokio::test]
    async fn test_ties_keep_index_order() {
        let idx = index();
        let hits = idx.embed_search("language", 5).await.unwrap();
        assert_eq!(
            hits.iter().map(|h| h.source.as_str()).collect::<Vec<_>>(),
            vec!["rust.md", "python.md"]
        );
    }

    #[tokio::test]
    async fn test_no_match_is_empty() {
        let idx = index();
        assert!(idx.embed_search("quantum chromodynamics", 3).await.unwrap().is_empty());
    }

    #[test]
    fn test_reindex_replaces_and_clear() {
        let idx = index();
        idx.index_document("rust.md", "Rust has ownership.", Some(serde_json::json!({"v": 2})))
            .unwrap();
        let docs = idx.list_documents();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[2].source, "rust.md");
        assert_eq!(idx.len(), 3);
        assert!(matches!(
            idx.index_document("empty.md", "  ", None),
            Err(RetrievalError::InvalidDocument(_))
        ));
        idx.clear();
        assert!(idx.is_empty());
        assert!(idx.list_documents().is_empty());
    }

    #[tokio::test]
    async fn test_index_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("a.md"), "Tokio is an async runtime.").unwrap();
        std::fs::write(dir.path().join("notes/b.txt"), "Serde serializes data.").unwrap();
        std::fs::write(dir.path().join("c.bin"), "ignored").unwrap();

        let idx = KeywordIndex::default();
        let n = idx.index_directory(dir.path(), &["md", ".txt"]).unwrap();
        assert_eq!(n, 2);
        let sources: Vec<String> = idx.list_documents().into_iter().map(|d| d.source).collect();
        assert_eq!(sources, vec!["a.md", "notes/b.txt"]);
        let hits = idx.embed_search("serde data", 1).await.unwrap();
        assert_eq!(hits[0].source, "notes/b.txt");
    }
}
