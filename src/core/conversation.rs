//! 会话槽位：一个会话的活跃状态、最后一次成功持久化的状态与阶段广播
//!
//! 槽位内的状态由 tokio::sync::Mutex 保护（公平 FIFO），同一会话的消息按到达顺序串行处理。

use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::core::{AgentPhase, AgentState, SessionSupervisor};
use crate::memory::MemoryStore;
use crate::persona::Persona;
use crate::react::PlanCheckpoint;

pub type ConversationId = String;

/// 已加载到内存中的会话状态
#[derive(Debug)]
pub(crate) struct LiveState {
    pub memory: MemoryStore,
    pub checkpoint: Option<PlanCheckpoint>,
    pub exchanges: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ConversationInner {
    /// None：尚未加载，或被取消后等待从持久化状态恢复
    pub live: Option<LiveState>,
    /// 最后一次成功写入的状态
    pub persisted: Option<AgentState>,
    /// 上次持久化失败，下一轮重试
    pub dirty: bool,
}

#[derive(Debug)]
pub(crate) struct Conversation {
    pub id: ConversationId,
    pub persona: Arc<Persona>,
    pub inner: Mutex<ConversationInner>,
    pub supervisor: SessionSupervisor,
    phase_tx: watch::Sender<AgentPhase>,
}

impl Conversation {
    pub fn new(id: ConversationId, persona: Arc<Persona>, inner: ConversationInner) -> Self {
        let (phase_tx, _) = watch::channel(AgentPhase::Idle);
        Self {
            id,
            persona,
            inner: Mutex::new(inner),
            supervisor: SessionSupervisor::new(),
            phase_tx,
        }
    }

    pub fn set_phase(&self, phase: AgentPhase) {
        self.phase_tx.send_replace(phase);
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentPhase> {
        self.phase_tx.subscribe()
    }

    /// 由活跃状态生成可持久化的 AgentState
    pub fn state_of(&self, live: &LiveState) -> AgentState {
        AgentState {
            conversation_id: self.id.clone(),
            persona: self.persona.clone(),
            memory: live.memory.snapshot(),
            checkpoint: live.checkpoint.clone(),
            exchanges: live.exchanges,
        }
    }
}
