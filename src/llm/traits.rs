//! 推理能力抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient：给定消息序列与约束，返回一段文本。
//! 超时与能力错误分开上报，供 RecoveryEngine 决定重试还是降级。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// 发送给推理能力的一条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// 生成约束
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionConstraints {
    /// 只输出一个 JSON 对象（规划阶段使用）
    pub json_only: bool,
    pub max_tokens: Option<u32>,
}

impl CompletionConstraints {
    pub fn json() -> Self {
        Self {
            json_only: true,
            max_tokens: None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("reasoning call timed out")]
    Timeout,
    #[error("{0}")]
    Capability(String),
}

/// 推理能力 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        constraints: &CompletionConstraints,
    ) -> Result<String, LlmError>;

    /// 客户端名称（日志用）
    fn name(&self) -> &str {
        "llm"
    }
}
