//! 状态序列化：AgentState ⇄ 版本化 JSON 信封，经 BlobStore 读写
//!
//! 键布局：最新状态 `state/{id}`，历史版本 `state/{id}@{exchanges:010}`（keep_history = 0 时不写历史）。
//! 编码是纯函数，不含时间戳，load(save(s)) == s。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{AgentError, AgentState};
use crate::store::blob::{BlobError, BlobStore};

pub const FORMAT_VERSION: u32 = 1;

const STATE_PREFIX: &str = "state/";

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format_version: u32,
    state: &'a AgentState,
}

#[derive(Deserialize)]
struct Envelope {
    format_version: u32,
    state: AgentState,
}

/// list_saved 返回的摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedConversation {
    pub conversation_id: String,
    pub persona_name: String,
    pub exchanges: u64,
}

pub struct StateSerializer {
    store: Arc<dyn BlobStore>,
    keep_history: usize,
}

impl StateSerializer {
    pub fn new(store: Arc<dyn BlobStore>, keep_history: usize) -> Self {
        Self {
            store,
            keep_history,
        }
    }

    pub fn state_key(conversation_id: &str) -> String {
        format!("{STATE_PREFIX}{conversation_id}")
    }

    fn history_prefix(conversation_id: &str) -> String {
        format!("{STATE_PREFIX}{conversation_id}@")
    }

    fn history_key(conversation_id: &str, exchanges: u64) -> String {
        format!("{}{exchanges:010}", Self::history_prefix(conversation_id))
    }

    pub fn encode(state: &AgentState) -> Result<Vec<u8>, AgentError> {
        serde_json::to_vec(&EnvelopeRef {
            format_version: FORMAT_VERSION,
            state,
        })
        .map_err(|e| AgentError::StatePersist(format!("encode: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<AgentState, AgentError> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| AgentError::StatePersist(format!("decode: {e}")))?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(AgentError::StatePersist(format!(
                "unsupported state format version {}",
                envelope.format_version
            )));
        }
        Ok(envelope.state)
    }

    /// 写入最新状态（及历史版本），返回最新状态的键
    pub async fn save(&self, state: &AgentState) -> Result<String, AgentError> {
        let bytes = Self::encode(state)?;
        let key = Self::state_key(&state.conversation_id);
        if self.keep_history > 0 {
            let hkey = Self::history_key(&state.conversation_id, state.exchanges);
            self.store
                .put(&hkey, bytes.clone())
                .await
                .map_err(persist_error)?;
        }
        self.store.put(&key, bytes).await.map_err(persist_error)?;
        if self.keep_history > 0 {
            if let Err(e) = self.prune_history(&state.conversation_id, self.keep_history).await {
                warn!(error = %e, "failed to prune state history");
            }
        }
        debug!(key = %key, exchanges = state.exchanges, "state saved");
        Ok(key)
    }

    /// 按键读取；不存在时返回 StateNotFound
    pub async fn load(&self, key: &str) -> Result<AgentState, AgentError> {
        let bytes = self.store.get(key).await.map_err(|e| match e {
            BlobError::NotFound(k) => AgentError::StateNotFound(k),
            other => persist_error(other),
        })?;
        Self::decode(&bytes)
    }

    pub async fn load_conversation(&self, conversation_id: &str) -> Result<AgentState, AgentError> {
        self.load(&Self::state_key(conversation_id)).await
    }

    /// 删除最新状态与全部历史版本
    pub async fn delete(&self, conversation_id: &str) -> Result<(), AgentError> {
        for key in self.history_keys(conversation_id).await? {
            self.store.delete(&key).await.map_err(persist_error)?;
        }
        self.store
            .delete(&Self::state_key(conversation_id))
            .await
            .map_err(persist_error)
    }

    async fn history_keys(&self, conversation_id: &str) -> Result<Vec<String>, AgentError> {
        self.store
            .list(&Self::history_prefix(conversation_id))
            .await
            .map_err(persist_error)
    }

    /// 历史版本，最新在前
    pub async fn history(&self, conversation_id: &str, limit: usize) -> Result<Vec<AgentState>, AgentError> {
        let mut keys = self.history_keys(conversation_id).await?;
        keys.reverse();
        let mut states = Vec::new();
        for key in keys.into_iter().take(limit) {
            states.push(self.load(&key).await?);
        }
        Ok(states)
    }

    /// 只保留最新的 keep_last 个历史版本，返回删除数
    pub async fn prune_history(&self, conversation_id: &str, keep_last: usize) -> Result<usize, AgentError> {
        let keys = self.history_keys(conversation_id).await?;
        let excess = keys.len().saturating_sub(keep_last);
        for key in &keys[..excess] {
            self.store.delete(key).await.map_err(persist_error)?;
        }
        Ok(excess)
    }

    /// 所有已保存的会话（按 id 排序）
    pub async fn list_saved(&self) -> Result<Vec<SavedConversation>, AgentError> {
        let keys = self.store.list(STATE_PREFIX).await.map_err(persist_error)?;
        let mut saved = Vec::new();
        for key in keys.into_iter().filter(|k| !k.contains('@')) {
            match self.load(&key).await {
                Ok(state) => saved.push(SavedConversation {
                    persona_name: state.persona.name().to_string(),
                    conversation_id: state.conversation_id,
                    exchanges: state.exchanges,
                }),
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable saved state"),
            }
        }
        Ok(saved)
    }
}

fn persist_error(e: BlobError) -> AgentError {
    AgentError::StatePersist(e.to_string())
}
