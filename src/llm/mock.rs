//! Mock 与脚本化客户端（用于测试，无需 API）
//!
//! MockLlmClient：规划时返回单步 respond 计划，其余时候回显最后一条 User 消息。
//! ScriptedLlmClient：按顺序返回预设结果（文本 / 错误 / 延迟），用于确定性测试。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{ChatMessage, ChatRole, CompletionConstraints, LlmClient, LlmError};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        constraints: &CompletionConstraints,
    ) -> Result<String, LlmError> {
        if constraints.json_only {
            return Ok(r#"{"steps": [{"kind": "respond"}]}"#.to_string());
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(String),
    Fail(LlmError),
    /// 先等待再回复（配合超时测试）
    Delayed(Duration, String),
}

/// 按脚本依次应答；脚本耗尽后返回 fallback（未设置时返回 Capability 错误）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<ScriptStep>>,
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(ScriptStep::Reply(text.into()))
    }

    pub fn with_failure(self, err: LlmError) -> Self {
        self.push(ScriptStep::Fail(err))
    }

    pub fn with_delayed_reply(self, delay: Duration, text: impl Into<String>) -> Self {
        self.push(ScriptStep::Delayed(delay, text.into()))
    }

    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    fn push(self, step: ScriptStep) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
        self
    }

    /// 已收到的调用（每次调用的完整消息序列）
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _constraints: &CompletionConstraints,
    ) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(ScriptStep::Reply(text)) => Ok(text),
            Some(ScriptStep::Fail(err)) => Err(err),
            Some(ScriptStep::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Capability("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
