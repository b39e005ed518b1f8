//! 状态定义：会话阶段与可持久化的 AgentState
//!
//! AgentPhase 通过 watch 通道对外可见；AgentState 是一个会话的完整可恢复状态（人设、记忆快照、计划检查点、轮次）。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memory::MemorySnapshot;
use crate::persona::Persona;
use crate::react::PlanCheckpoint;

/// 单条消息处理过程中的阶段
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum AgentPhase {
    Idle,
    LoadingState,
    Planning,
    /// 第 step 步（从 0 开始）/ 共 total 步
    Executing { step: usize, total: usize },
    Persisting,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentPhase::Idle => f.write_str("idle"),
            AgentPhase::LoadingState => f.write_str("loading_state"),
            AgentPhase::Planning => f.write_str("planning"),
            AgentPhase::Executing { step, total } => write!(f, "executing({}/{})", step + 1, total),
            AgentPhase::Persisting => f.write_str("persisting"),
        }
    }
}

/// 会话的完整可恢复状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub conversation_id: String,
    pub persona: Arc<Persona>,
    pub memory: MemorySnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<PlanCheckpoint>,
    /// 已完成的交互轮次
    pub exchanges: u64,
}

impl AgentState {
    pub fn fresh(conversation_id: impl Into<String>, persona: Arc<Persona>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            persona,
            memory: MemorySnapshot::default(),
            checkpoint: None,
            exchanges: 0,
        }
    }
}
