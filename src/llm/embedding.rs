//! 嵌入能力：VectorIndex 建索引与查询时把文本编码为向量
//!
//! 建索引时整篇文档的块一次批量编码；请求带超时，失败统一为 RetrievalError::Unavailable。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::debug;

use crate::retrieval::RetrievalError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 按输入顺序返回向量，长度与 texts 相同
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RetrievalError::Unavailable("no embedding returned".to_string()))
    }
}

/// OpenAI 兼容的 /embeddings 端点
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiEmbedder {
    /// 未显式传入 key 时读取 OPENAI_API_KEY
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, request_timeout: Duration) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: request_timeout,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(texts.to_vec()))
            .build()
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;
        let response = timeout(self.timeout, self.client.embeddings().create(request))
            .await
            .map_err(|_| RetrievalError::Unavailable(format!("embedding timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        let mut data = response.data;
        if data.len() != texts.len() {
            return Err(RetrievalError::Unavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        data.sort_by_key(|e| e.index);
        debug!(model = %self.model, inputs = texts.len(), "embeddings created");
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}
