//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Retry / Reprompt / Degrade / StartFresh / ContinueInMemory / Abort。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误（能力超时、计划非法、工具失败、检索不可用、状态读写等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 推理 / 检索 / 工具调用超过期限
    #[error("Capability timeout: {0}")]
    CapabilityTimeout(String),

    /// 推理能力返回错误（非超时）
    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Schema mismatch for tool {tool}: {reason}")]
    SchemaMismatch { tool: String, reason: String },

    #[error("Tool execution failed ({tool}): {cause}")]
    ToolExecution { tool: String, cause: String },

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("State not found: {0}")]
    StateNotFound(String),

    #[error("State persist error: {0}")]
    StatePersist(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 稳定的错误类别名，写入工具记忆条目的 metadata 与步骤结果
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::CapabilityTimeout(_) => "capability_timeout",
            AgentError::Capability(_) => "capability_error",
            AgentError::InvalidPlan(_) => "invalid_plan",
            AgentError::ToolNotFound(_) => "tool_not_found",
            AgentError::DuplicateTool(_) => "duplicate_tool",
            AgentError::SchemaMismatch { .. } => "schema_mismatch",
            AgentError::ToolExecution { .. } => "tool_execution_error",
            AgentError::RetrievalUnavailable(_) => "retrieval_unavailable",
            AgentError::StateNotFound(_) => "state_not_found",
            AgentError::StatePersist(_) => "state_persist_error",
            AgentError::Config(_) => "config_error",
            AgentError::ConversationNotFound(_) => "conversation_not_found",
            AgentError::InvalidInput(_) => "invalid_input",
            AgentError::Cancelled => "cancelled",
        }
    }

    /// 工具调用类错误（上报给 Planner，不影响会话）
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            AgentError::ToolNotFound(_)
                | AgentError::SchemaMismatch { .. }
                | AgentError::ToolExecution { .. }
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 原样重试同一次调用（超时 / 临时错误）
    Retry,
    /// 将拒绝原因注入下一轮提示后重新规划
    Reprompt(String),
    /// 放弃该步骤，带说明降级继续
    Degrade(String),
    /// 状态不存在：以全新状态开始
    StartFresh,
    /// 持久化失败：继续在内存中运行，下一轮重试
    ContinueInMemory,
    /// 终止当前请求
    Abort,
}
