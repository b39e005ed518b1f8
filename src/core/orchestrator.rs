//! Agent 编排器：主控循环
//!
//! 每条消息走一遍状态机 Idle → LoadingState → Planning → Executing(step) → Persisting → Idle，
//! 阶段经 watch 通道对外可见。同一会话的消息在会话锁上排队串行，不同会话完全并行。
//! 取消（cancel 或丢弃 future）会中止进行中的工具调用，会话状态回到最后一次成功持久化的版本；
//! 其他错误保留已写入的记忆条目。持久化失败只记录告警，下一轮重试。

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::{mpsc, watch, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::conversation::{Conversation, ConversationId, ConversationInner, LiveState};
use crate::core::{AgentError, AgentPhase, AgentState, Clock};
use crate::memory::{MemoryConfig, MemoryRole, MemoryStore, Summarizer};
use crate::persona::Persona;
use crate::react::{PlanEvent, PlanReply, PlanRun, PlanSession, Planner, StepProgress};
use crate::retrieval::ContextRetriever;
use crate::store::{SavedConversation, StateSerializer};
use crate::tools::{ToolInvoker, ToolRegistry};

/// 编排器：持有各组件与会话表
pub struct Orchestrator {
    planner: Planner,
    invoker: ToolInvoker,
    retriever: ContextRetriever,
    serializer: StateSerializer,
    summarizer: Arc<dyn Summarizer>,
    clock: Arc<dyn Clock>,
    memory_config: MemoryConfig,
    /// 所有计划都按可恢复处理
    checkpoint_plans: bool,
    conversations: RwLock<HashMap<ConversationId, Arc<Conversation>>>,
    event_tx: Option<mpsc::UnboundedSender<PlanEvent>>,
}

/// 构造 Orchestrator 所需的组件（由 AgentBuilder 组装）
pub struct OrchestratorParts {
    pub planner: Planner,
    pub invoker: ToolInvoker,
    pub retriever: ContextRetriever,
    pub serializer: StateSerializer,
    pub summarizer: Arc<dyn Summarizer>,
    pub clock: Arc<dyn Clock>,
    pub memory_config: MemoryConfig,
    pub checkpoint_plans: bool,
    pub event_tx: Option<mpsc::UnboundedSender<PlanEvent>>,
}

/// 持有会话锁的一次消息处理；未 disarm 就被丢弃（调用方丢弃了 future）时回到最后一次持久化的状态
struct ExchangeGuard<'a> {
    conversation: &'a Conversation,
    inner: MutexGuard<'a, ConversationInner>,
    armed: bool,
}

impl<'a> ExchangeGuard<'a> {
    async fn lock(conversation: &'a Conversation) -> Self {
        Self {
            conversation,
            inner: conversation.inner.lock().await,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(conversation = %self.conversation.id, "exchange dropped, restoring last persisted state");
            self.inner.live = None;
            self.conversation.set_phase(AgentPhase::Idle);
        }
    }
}

fn validate_id(id: &str) -> Result<(), AgentError> {
    if id.trim().is_empty() || id.contains('/') || id.contains('@') {
        return Err(AgentError::InvalidInput(format!(
            "conversation id `{id}` must be non-empty and must not contain '/' or '@'"
        )));
    }
    Ok(())
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            planner: parts.planner,
            invoker: parts.invoker,
            retriever: parts.retriever,
            serializer: parts.serializer,
            summarizer: parts.summarizer,
            clock: parts.clock,
            memory_config: parts.memory_config,
            checkpoint_plans: parts.checkpoint_plans,
            conversations: RwLock::new(HashMap::new()),
            event_tx: parts.event_tx,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.invoker.registry()
    }

    pub fn retriever(&self) -> &ContextRetriever {
        &self.retriever
    }

    fn send_event(&self, event: PlanEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn new_memory(&self) -> MemoryStore {
        MemoryStore::new(self.memory_config.clone(), self.summarizer.clone(), self.clock.clone())
    }

    fn live_from_state(&self, state: AgentState) -> LiveState {
        LiveState {
            memory: MemoryStore::from_snapshot(
                state.memory,
                self.memory_config.clone(),
                self.summarizer.clone(),
                self.clock.clone(),
            ),
            checkpoint: state.checkpoint,
            exchanges: state.exchanges,
        }
    }

    async fn conversation(&self, id: &str) -> Result<Arc<Conversation>, AgentError> {
        self.conversations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::ConversationNotFound(id.to_string()))
    }

    /// 插入会话槽位；同 id 已打开时保留已有槽位
    async fn insert(&self, conversation: Conversation) -> ConversationId {
        let id = conversation.id.clone();
        self.conversations
            .write()
            .await
            .entry(id.clone())
            .or_insert_with(|| Arc::new(conversation));
        id
    }

    /// 以新的空状态开始会话，返回生成的会话 id
    pub async fn start_conversation(&self, persona: Persona) -> Result<ConversationId, AgentError> {
        let id = uuid::Uuid::new_v4().to_string();
        let live = LiveState {
            memory: self.new_memory(),
            checkpoint: None,
            exchanges: 0,
        };
        let inner = ConversationInner {
            live: Some(live),
            ..ConversationInner::default()
        };
        let id = self.insert(Conversation::new(id, Arc::new(persona), inner)).await;
        info!(conversation = %id, "conversation started");
        Ok(id)
    }

    /// 打开具名会话：已保存则恢复记忆与轮次（使用传入的人设），否则全新开始；已打开时直接返回
    pub async fn open_conversation(&self, id: &str, persona: Persona) -> Result<ConversationId, AgentError> {
        validate_id(id)?;
        if self.conversations.read().await.contains_key(id) {
            return Ok(id.to_string());
        }
        let persisted = match self.serializer.load_conversation(id).await {
            Ok(state) => Some(state),
            Err(AgentError::StateNotFound(_)) => None,
            Err(e) => {
                warn!(conversation = %id, error = %e, "saved state unreadable, starting fresh");
                None
            }
        };
        let persona = Arc::new(persona);
        let inner = match persisted {
            Some(mut state) => {
                state.persona = persona.clone();
                ConversationInner {
                    live: Some(self.live_from_state(state.clone())),
                    persisted: Some(state),
                    dirty: false,
                }
            }
            None => ConversationInner {
                live: Some(LiveState {
                    memory: self.new_memory(),
                    checkpoint: None,
                    exchanges: 0,
                }),
                ..ConversationInner::default()
            },
        };
        let id = self.insert(Conversation::new(id.to_string(), persona, inner)).await;
        info!(conversation = %id, "conversation opened");
        Ok(id)
    }

    /// 重启后挂载已保存的会话（人设取自保存的状态）
    pub async fn resume_conversation(&self, id: &str) -> Result<ConversationId, AgentError> {
        validate_id(id)?;
        if self.conversations.read().await.contains_key(id) {
            return Ok(id.to_string());
        }
        let state = self.serializer.load_conversation(id).await?;
        let inner = ConversationInner {
            live: Some(self.live_from_state(state.clone())),
            persisted: Some(state.clone()),
            dirty: false,
        };
        let id = self.insert(Conversation::new(id.to_string(), state.persona, inner)).await;
        info!(conversation = %id, exchanges = state.exchanges, "conversation resumed");
        Ok(id)
    }

    /// 处理一条用户消息，返回回复
    pub async fn handle_message(&self, id: &str, text: &str) -> Result<String, AgentError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::InvalidInput("message is empty".to_string()));
        }
        let conversation = self.conversation(id).await?;
        let mut guard = ExchangeGuard::lock(&conversation).await;
        if conversation.supervisor.is_shut_down() {
            guard.disarm();
            return Err(AgentError::ConversationNotFound(id.to_string()));
        }
        let token = conversation.supervisor.begin_exchange();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(AgentError::Cancelled),
            r = self.run_exchange(&conversation, &mut guard.inner, text, &token) => r,
        };
        self.finish_exchange(&conversation, &mut guard.inner, result.as_ref().err());
        guard.disarm();
        result.map(|reply| reply.text)
    }

    /// 继续执行被中断的可恢复计划；没有检查点时返回 None
    pub async fn resume_checkpoint(&self, id: &str) -> Result<Option<String>, AgentError> {
        let conversation = self.conversation(id).await?;
        let mut guard = ExchangeGuard::lock(&conversation).await;
        if conversation.supervisor.is_shut_down() {
            guard.disarm();
            return Err(AgentError::ConversationNotFound(id.to_string()));
        }
        let token = conversation.supervisor.begin_exchange();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(AgentError::Cancelled),
            r = self.run_checkpoint(&conversation, &mut guard.inner, &token) => r,
        };
        self.finish_exchange(&conversation, &mut guard.inner, result.as_ref().err());
        guard.disarm();
        result.map(|reply| reply.map(|r| r.text))
    }

    fn finish_exchange(
        &self,
        conversation: &Conversation,
        inner: &mut ConversationInner,
        error: Option<&AgentError>,
    ) {
        match error {
            None => {}
            Some(AgentError::Cancelled) => {
                // 丢弃未持久化的改动，下一轮从持久化状态重新加载
                warn!(conversation = %conversation.id, "exchange cancelled, restoring last persisted state");
                inner.live = None;
            }
            Some(e) => {
                warn!(conversation = %conversation.id, error = %e, "exchange failed");
            }
        }
        conversation.set_phase(AgentPhase::Idle);
    }

    async fn ensure_loaded<'a>(
        &self,
        conversation: &Conversation,
        inner: &'a mut ConversationInner,
    ) -> &'a mut LiveState {
        if inner.live.is_none() {
            let state = match inner.persisted.clone() {
                Some(state) => state,
                None => match self.serializer.load_conversation(&conversation.id).await {
                    Ok(state) => state,
                    Err(AgentError::StateNotFound(_)) => AgentState::fresh(conversation.id.clone(), conversation.persona.clone()),
                    Err(e) => {
                        warn!(conversation = %conversation.id, error = %e, "state load failed, starting fresh");
                        AgentState::fresh(conversation.id.clone(), conversation.persona.clone())
                    }
                },
            };
            inner.live = Some(self.live_from_state(state));
        }
        inner
            .live
            .get_or_insert_with(|| LiveState {
                memory: self.new_memory(),
                checkpoint: None,
                exchanges: 0,
            })
    }

    async fn run_exchange(
        &self,
        conversation: &Conversation,
        inner: &mut ConversationInner,
        text: &str,
        token: &CancellationToken,
    ) -> Result<PlanReply, AgentError> {
        conversation.set_phase(AgentPhase::LoadingState);
        if inner.dirty {
            info!(conversation = %conversation.id, "retrying persist of previous exchange");
            self.persist(conversation, inner).await;
        }
        let live = self.ensure_loaded(conversation, inner).await;
        if live.checkpoint.take().is_some() {
            info!(conversation = %conversation.id, "discarding unfinished plan checkpoint for new message");
        }
        live.memory.record(MemoryRole::User, text, None);

        conversation.set_phase(AgentPhase::Planning);
        self.send_event(PlanEvent::Planning {
            conversation_id: conversation.id.clone(),
        });
        let snapshot = live.memory.snapshot();
        let mut plan = self
            .planner
            .plan(text, &conversation.persona, &snapshot, self.invoker.registry())
            .await;
        plan.resumable = plan.resumable || self.checkpoint_plans;
        self.send_event(PlanEvent::PlanReady {
            conversation_id: conversation.id.clone(),
            steps: plan.steps.iter().map(|s| s.kind()).collect(),
            fallback: plan.fallback,
        });

        let reply = self.drive(conversation, inner, PlanRun::new(plan), token).await?;
        self.complete_exchange(conversation, inner, &reply).await;
        Ok(reply)
    }

    async fn run_checkpoint(
        &self,
        conversation: &Conversation,
        inner: &mut ConversationInner,
        token: &CancellationToken,
    ) -> Result<Option<PlanReply>, AgentError> {
        conversation.set_phase(AgentPhase::LoadingState);
        let live = self.ensure_loaded(conversation, inner).await;
        let Some(checkpoint) = live.checkpoint.clone() else {
            return Ok(None);
        };
        info!(
            conversation = %conversation.id,
            next_step = checkpoint.next_step,
            "resuming plan from checkpoint"
        );
        let reply = self
            .drive(conversation, inner, PlanRun::from_checkpoint(checkpoint), token)
            .await?;
        self.complete_exchange(conversation, inner, &reply).await;
        Ok(Some(reply))
    }

    /// 逐步执行计划；可恢复计划每步之后写检查点并持久化
    async fn drive(
        &self,
        conversation: &Conversation,
        inner: &mut ConversationInner,
        mut run: PlanRun,
        token: &CancellationToken,
    ) -> Result<PlanReply, AgentError> {
        let session = PlanSession {
            conversation_id: &conversation.id,
            planner: &self.planner,
            invoker: &self.invoker,
            retriever: &self.retriever,
            persona: &conversation.persona,
            cancel_token: token.clone(),
            event_tx: self.event_tx.as_ref(),
        };
        let resumable = run.plan().resumable;
        loop {
            conversation.set_phase(AgentPhase::Executing {
                step: run.next_step(),
                total: run.total_steps(),
            });
            let live = self.ensure_loaded(conversation, inner).await;
            match run.run_step(&session, &mut live.memory).await? {
                StepProgress::Finished(reply) => return Ok(reply),
                StepProgress::Continue if resumable => {
                    live.checkpoint = Some(run.checkpoint());
                    self.persist(conversation, inner).await;
                }
                StepProgress::Continue => {}
            }
        }
    }

    async fn complete_exchange(&self, conversation: &Conversation, inner: &mut ConversationInner, reply: &PlanReply) {
        let live = self.ensure_loaded(conversation, inner).await;
        live.memory.record(
            MemoryRole::Agent,
            reply.text.clone(),
            reply.degraded.then(|| json!({"degraded": true})),
        );
        live.checkpoint = None;
        live.exchanges += 1;

        conversation.set_phase(AgentPhase::Persisting);
        self.persist(conversation, inner).await;
    }

    /// 持久化当前状态；失败时继续在内存中运行，下一轮重试
    async fn persist(&self, conversation: &Conversation, inner: &mut ConversationInner) {
        let Some(live) = inner.live.as_ref() else {
            return;
        };
        let state = conversation.state_of(live);
        match self.serializer.save(&state).await {
            Ok(_) => {
                inner.persisted = Some(state);
                inner.dirty = false;
            }
            Err(e) => {
                warn!(conversation = %conversation.id, error = %e, "persist failed, continuing in memory");
                inner.dirty = true;
            }
        }
    }

    /// 结束会话：最终持久化并移除活跃槽位
    pub async fn end_conversation(&self, id: &str) -> Result<(), AgentError> {
        let conversation = self
            .conversations
            .write()
            .await
            .remove(id)
            .ok_or_else(|| AgentError::ConversationNotFound(id.to_string()))?;
        self.close(&conversation).await
    }

    async fn close(&self, conversation: &Conversation) -> Result<(), AgentError> {
        let mut inner = conversation.inner.lock().await;
        conversation.supervisor.shutdown();
        let result = match inner.live.as_ref() {
            Some(live) => {
                let state = conversation.state_of(live);
                self.serializer.save(&state).await.map(|_| ())
            }
            None => Ok(()),
        };
        inner.live = None;
        info!(conversation = %conversation.id, ok = result.is_ok(), "conversation ended");
        result
    }

    /// 取消会话当前正在处理的消息
    pub async fn cancel(&self, id: &str) -> Result<(), AgentError> {
        self.conversation(id).await?.supervisor.cancel();
        Ok(())
    }

    /// 清空会话记忆（人设保留）并持久化
    pub async fn clear_memory(&self, id: &str) -> Result<(), AgentError> {
        let conversation = self.conversation(id).await?;
        let mut inner = conversation.inner.lock().await;
        let live = self.ensure_loaded(&conversation, &mut inner).await;
        live.memory.clear();
        live.checkpoint = None;
        self.persist(&conversation, &mut inner).await;
        Ok(())
    }

    /// 删除会话：移除活跃槽位并删除保存的状态与历史
    pub async fn delete_conversation(&self, id: &str) -> Result<(), AgentError> {
        let removed = self.conversations.write().await.remove(id);
        if let Some(conversation) = removed {
            conversation.supervisor.shutdown();
            let mut inner = conversation.inner.lock().await;
            inner.live = None;
            inner.persisted = None;
        }
        self.serializer.delete(id).await?;
        info!(conversation = %id, "conversation deleted");
        Ok(())
    }

    /// 会话当前状态（等待正在处理的消息完成）
    pub async fn snapshot(&self, id: &str) -> Result<AgentState, AgentError> {
        let conversation = self.conversation(id).await?;
        let mut inner = conversation.inner.lock().await;
        let live = self.ensure_loaded(&conversation, &mut inner).await;
        Ok(conversation.state_of(live))
    }

    /// 当前阶段的订阅端
    pub async fn subscribe_phase(&self, id: &str) -> Result<watch::Receiver<AgentPhase>, AgentError> {
        Ok(self.conversation(id).await?.subscribe())
    }

    pub async fn phase(&self, id: &str) -> Result<AgentPhase, AgentError> {
        Ok(self.conversation(id).await?.phase())
    }

    pub async fn live_conversations(&self) -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> = self.conversations.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn list_saved(&self) -> Result<Vec<SavedConversation>, AgentError> {
        self.serializer.list_saved().await
    }

    pub async fn state_history(&self, id: &str, limit: usize) -> Result<Vec<AgentState>, AgentError> {
        self.serializer.history(id, limit).await
    }

    /// 结束所有活跃会话（并行做最终持久化）
    pub async fn shutdown(&self) {
        let conversations: Vec<Arc<Conversation>> = self.conversations.write().await.drain().map(|(_, c)| c).collect();
        let results = join_all(conversations.iter().map(|c| self.close(c))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(closed = results.len(), failed, "orchestrator shut down");
    }
}
