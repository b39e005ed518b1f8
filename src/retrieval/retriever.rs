//! 上下文检索器：包装检索后端，加超时、排序与格式化
//!
//! 后端错误或超时统一返回 RetrievalUnavailable，由计划执行方视为「无可用上下文」。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::config::RetrievalSection;
use crate::core::AgentError;
use crate::retrieval::backend::SearchBackend;

/// 检索得到的上下文片段，只在一次计划内有效
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub source: String,
    pub text: String,
    pub score: f32,
}

#[derive(Clone)]
pub struct ContextRetriever {
    backend: Arc<dyn SearchBackend>,
    timeout: Duration,
    default_k: usize,
}

impl ContextRetriever {
    pub fn new(backend: Arc<dyn SearchBackend>, timeout: Duration, default_k: usize) -> Self {
        Self {
            backend,
            timeout,
            default_k,
        }
    }

    pub fn from_config(backend: Arc<dyn SearchBackend>, cfg: &RetrievalSection) -> Self {
        Self::new(backend, Duration::from_secs(cfg.timeout_secs), cfg.default_k)
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// 至多 k 条，按分数降序（同分保持后端顺序）；k = 0 或空查询直接返回空
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ContextChunk>, AgentError> {
        let query = query.trim();
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let passages = match timeout(self.timeout, self.backend.embed_search(query, k)).await {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => return Err(AgentError::RetrievalUnavailable(e.to_string())),
            Err(_) => {
                return Err(AgentError::RetrievalUnavailable(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        };
        let mut chunks: Vec<ContextChunk> = passages
            .into_iter()
            .map(|p| ContextChunk {
                source: p.source,
                text: p.text,
                score: p.score,
            })
            .collect();
        chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
        chunks.truncate(k);
        Ok(chunks)
    }
}

/// 渲染为提示中的上下文段落
pub fn format_context(chunks: &[ContextChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Relevant Context {} (from {}):\n{}", i + 1, c.source, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
