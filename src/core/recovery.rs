//! 错误恢复引擎
//!
//! 根据 AgentError 类型与已尝试次数返回 RecoveryAction，供 Planner、计划执行循环与编排器决定是重试、重新提示、降级还是终止。

use crate::config::PlannerSection;
use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作，重试次数均有上限
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    capability_retries: usize,
    plan_retries: usize,
    tool_retries: usize,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::from_config(&PlannerSection::default())
    }
}

impl RecoveryEngine {
    pub fn new(capability_retries: usize, plan_retries: usize, tool_retries: usize) -> Self {
        Self {
            capability_retries,
            plan_retries,
            tool_retries,
        }
    }

    pub fn from_config(cfg: &PlannerSection) -> Self {
        Self::new(cfg.capability_retries, cfg.max_plan_retries, cfg.tool_retries)
    }

    /// attempt 为已失败的次数（首次失败传 1）
    pub fn handle(&self, err: &AgentError, attempt: usize) -> RecoveryAction {
        match err {
            AgentError::CapabilityTimeout(what) | AgentError::Capability(what) => {
                if attempt <= self.capability_retries {
                    RecoveryAction::Retry
                } else {
                    RecoveryAction::Degrade(format!("reasoning capability unavailable ({what})"))
                }
            }
            AgentError::InvalidPlan(reason) => {
                if attempt <= self.plan_retries {
                    RecoveryAction::Reprompt(format!(
                        "Your previous plan was rejected: {reason}. \
                         Reply with exactly one JSON object matching the plan schema, \
                         ending with a single \"respond\" step."
                    ))
                } else {
                    RecoveryAction::Degrade("falling back to a direct response".to_string())
                }
            }
            AgentError::ToolExecution { tool, cause } => {
                if cause.contains("timed out") && attempt <= self.tool_retries {
                    RecoveryAction::Retry
                } else {
                    RecoveryAction::Degrade(format!("tool `{tool}` failed: {cause}"))
                }
            }
            AgentError::SchemaMismatch { tool, reason } => {
                RecoveryAction::Degrade(format!("tool `{tool}` rejected its arguments: {reason}"))
            }
            AgentError::ToolNotFound(name) => {
                RecoveryAction::Degrade(format!("tool `{name}` is not available"))
            }
            AgentError::RetrievalUnavailable(_) => {
                RecoveryAction::Degrade("relevant context could not be retrieved".to_string())
            }
            AgentError::StateNotFound(_) => RecoveryAction::StartFresh,
            AgentError::StatePersist(_) => RecoveryAction::ContinueInMemory,
            AgentError::DuplicateTool(_)
            | AgentError::Config(_)
            | AgentError::ConversationNotFound(_)
            | AgentError::InvalidInput(_)
            | AgentError::Cancelled => RecoveryAction::Abort,
        }
    }
}
