//! 计划执行循环
//!
//! PlanRun 按声明顺序逐步执行 Plan：reason / respond 调用推理能力，retrieve 调用 ContextRetriever，
//! invoke_tool 经 ToolInvoker 调用工具（超时按 tool_retries 重试）。检索与工具失败不终止计划，
//! 失败说明会拼入后续 reason / respond 的提示，最终回复附带 `[Note: ...]`。
//! 每步之后可以导出 PlanCheckpoint，中断后从 from_checkpoint 继续。

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::{AgentError, RecoveryAction};
use crate::llm::ChatMessage;
use crate::memory::{MemoryRole, MemoryStore, PromptSegment, WorkingMemory};
use crate::persona::Persona;
use crate::react::planner::{join_segments, render_history};
use crate::react::{Plan, PlanCheckpoint, PlanEvent, PlanStep, Planner, StepAction, StepKind, StepOutcome, StepRecord};
use crate::react::plan::resolve_placeholders;
use crate::retrieval::ContextRetriever;
use crate::tools::ToolInvoker;

/// 事件与工具结果预览的最大字符数
const PREVIEW_CHARS: usize = 200;

/// 单次计划执行所需的协作者
pub struct PlanSession<'a> {
    pub conversation_id: &'a str,
    pub planner: &'a Planner,
    pub invoker: &'a ToolInvoker,
    pub retriever: &'a ContextRetriever,
    pub persona: &'a Persona,
    pub cancel_token: CancellationToken,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a mpsc::UnboundedSender<PlanEvent>>,
}

impl<'a> PlanSession<'a> {
    pub fn new(
        conversation_id: &'a str,
        planner: &'a Planner,
        invoker: &'a ToolInvoker,
        retriever: &'a ContextRetriever,
        persona: &'a Persona,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            conversation_id,
            planner,
            invoker,
            retriever,
            persona,
            cancel_token,
            event_tx: None,
        }
    }

    pub fn with_event_tx(mut self, tx: &'a mpsc::UnboundedSender<PlanEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub(crate) fn send(&self, event: PlanEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// 计划的最终回复
#[derive(Debug, Clone, PartialEq)]
pub struct PlanReply {
    pub text: String,
    /// 有步骤失败，回复带说明
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepProgress {
    Continue,
    Finished(PlanReply),
}

/// 正在执行的计划
#[derive(Debug, Clone)]
pub struct PlanRun {
    plan: Plan,
    records: Vec<StepRecord>,
    next_step: usize,
}

impl PlanRun {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            records: Vec::new(),
            next_step: 0,
        }
    }

    pub fn from_checkpoint(checkpoint: PlanCheckpoint) -> Self {
        Self {
            plan: checkpoint.plan,
            records: checkpoint.completed,
            next_step: checkpoint.next_step,
        }
    }

    pub fn checkpoint(&self) -> PlanCheckpoint {
        PlanCheckpoint {
            plan: self.plan.clone(),
            completed: self.records.clone(),
            next_step: self.next_step,
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn next_step(&self) -> usize {
        self.next_step
    }

    pub fn total_steps(&self) -> usize {
        self.plan.steps.len()
    }

    /// 已失败步骤的说明（拼入提示与回复）
    pub fn failure_notes(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| match &r.outcome {
                StepOutcome::Error { kind, message } => {
                    Some(format!("step {} ({}) failed with {kind}: {message}", r.index, r.kind))
                }
                _ => None,
            })
            .collect()
    }

    /// 执行下一步；只有取消会以错误返回
    pub async fn run_step(
        &mut self,
        session: &PlanSession<'_>,
        memory: &mut MemoryStore,
    ) -> Result<StepProgress, AgentError> {
        let step = self
            .plan
            .steps
            .get(self.next_step)
            .cloned()
            .ok_or_else(|| AgentError::InvalidPlan("plan ended without a respond step".to_string()))?;
        if session.cancel_token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        session.send(PlanEvent::StepStarted {
            conversation_id: session.conversation_id.to_string(),
            index: step.index,
            kind: step.kind(),
        });

        let outcome = match &step.action {
            StepAction::Reason { instruction } => {
                let messages = self.step_messages(session, memory, &step, instruction.clone());
                match session.planner.complete_with_retry(&messages).await {
                    Ok(text) => StepOutcome::Text(text.trim().to_string()),
                    Err(e) => StepOutcome::error(&e),
                }
            }
            StepAction::Retrieve { query, k } => {
                let k = k.unwrap_or_else(|| session.retriever.default_k());
                match session.retriever.retrieve(query, k).await {
                    Ok(chunks) => StepOutcome::Context(chunks),
                    Err(e) => StepOutcome::error(&e),
                }
            }
            StepAction::InvokeTool { tool, args } => {
                self.invoke_tool(session, memory, step.index, tool, args).await?
            }
            StepAction::Respond { instruction } => {
                let reply = self.respond(session, memory, &step, instruction.as_deref()).await;
                self.records.push(StepRecord {
                    index: step.index,
                    kind: StepKind::Respond,
                    outcome: StepOutcome::Text(reply.text.clone()),
                });
                self.next_step += 1;
                session.send(PlanEvent::ResponseReady {
                    conversation_id: session.conversation_id.to_string(),
                    degraded: reply.degraded,
                });
                return Ok(StepProgress::Finished(reply));
            }
        };

        match &outcome {
            StepOutcome::Error { kind, message } => {
                warn!(step = step.index, kind = %kind, message = %message, "plan step failed");
                session.send(PlanEvent::StepFailed {
                    conversation_id: session.conversation_id.to_string(),
                    index: step.index,
                    kind: kind.clone(),
                    message: message.clone(),
                });
            }
            ok => session.send(PlanEvent::StepFinished {
                conversation_id: session.conversation_id.to_string(),
                index: step.index,
                preview: preview(&ok.render()),
            }),
        }
        self.records.push(StepRecord {
            index: step.index,
            kind: step.kind(),
            outcome,
        });
        self.next_step += 1;
        Ok(StepProgress::Continue)
    }

    async fn invoke_tool(
        &self,
        session: &PlanSession<'_>,
        memory: &mut MemoryStore,
        index: usize,
        tool: &str,
        args: &serde_json::Value,
    ) -> Result<StepOutcome, AgentError> {
        let args = resolve_placeholders(args, &self.records);
        let recovery = session.planner.recovery();
        let mut failures = 0usize;
        let result = loop {
            match session
                .invoker
                .invoke_cancellable(tool, args.clone(), &session.cancel_token)
                .await
            {
                Ok(value) => break Ok(value),
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    failures += 1;
                    match recovery.handle(&e, failures) {
                        RecoveryAction::Retry => {
                            warn!(tool = %tool, attempt = failures, "tool timed out, retrying");
                        }
                        action => {
                            info!(tool = %tool, ?action, "tool step degraded");
                            break Err(e);
                        }
                    }
                }
            }
        };

        let outcome = match result {
            Ok(value) => {
                memory.record(
                    MemoryRole::Tool,
                    format!("{tool} -> {value}"),
                    Some(json!({"tool": tool, "step": index, "ok": true})),
                );
                StepOutcome::ToolOutput(value)
            }
            Err(e) => {
                memory.record(
                    MemoryRole::Tool,
                    format!("{tool} failed: {e}"),
                    Some(json!({"tool": tool, "step": index, "ok": false, "kind": e.kind()})),
                );
                StepOutcome::error(&e)
            }
        };
        Ok(outcome)
    }

    async fn respond(
        &self,
        session: &PlanSession<'_>,
        memory: &MemoryStore,
        step: &PlanStep,
        instruction: Option<&str>,
    ) -> PlanReply {
        let strategy = session.persona.strategy();
        let mut task = self.plan.task.clone();
        if let Some(instruction) = instruction.filter(|s| !s.trim().is_empty()) {
            task = format!("{task}\n\n{instruction}");
        }
        let messages = self.step_messages(session, memory, step, strategy.build_prompt(&task));
        let notes = self.failure_notes();

        match session.planner.complete_with_retry(&messages).await {
            Ok(text) => {
                let mut reply = strategy.process_response(&text);
                if !notes.is_empty() {
                    reply = format!("{reply}\n\n[Note: {}]", notes.join("; "));
                }
                PlanReply {
                    text: reply,
                    degraded: !notes.is_empty(),
                }
            }
            Err(e) => {
                warn!(error = %e, "respond step failed, composing best-effort reply");
                PlanReply {
                    text: self.best_effort_reply(&e, &notes),
                    degraded: true,
                }
            }
        }
    }

    /// 推理能力不可用时，用已收集到的结果拼出回复
    fn best_effort_reply(&self, err: &AgentError, notes: &[String]) -> String {
        let gathered: Vec<String> = self
            .records
            .iter()
            .filter(|r| !r.outcome.is_error())
            .map(|r| format!("- step {} ({}): {}", r.index, r.kind, r.outcome.render()))
            .collect();
        let mut reply = if gathered.is_empty() {
            "I'm sorry, I could not produce an answer right now.".to_string()
        } else {
            format!(
                "I could not compose a full answer, but here is what I gathered:\n{}",
                gathered.join("\n")
            )
        };
        let mut all_notes = notes.to_vec();
        all_notes.push(format!("the reply could not be generated ({err})"));
        reply.push_str(&format!("\n\n[Note: {}]", all_notes.join("; ")));
        reply
    }

    /// reason / respond 的提示：人设 + 摘要 + 最近对话 + 可见步骤结果与失败说明
    fn step_messages(
        &self,
        session: &PlanSession<'_>,
        memory: &MemoryStore,
        step: &PlanStep,
        instruction: String,
    ) -> Vec<ChatMessage> {
        let mut working = WorkingMemory::new(self.plan.task.clone());
        let all_prior = step.kind() == StepKind::Respond && step.depends_on.is_empty();
        for record in &self.records {
            if record.outcome.is_error() {
                continue;
            }
            if all_prior || step.depends_on.contains(&record.index) {
                working.add_observation(format!(
                    "Step {} ({}): {}",
                    record.index,
                    record.kind,
                    record.outcome.render()
                ));
            }
        }
        for note in self.failure_notes() {
            working.add_failure(note);
        }

        let summary = if memory.summary().is_empty() {
            String::new()
        } else {
            format!("Conversation summary:\n{}", memory.summary())
        };
        let segments = vec![
            (PromptSegment::Persona, session.persona.system_prompt()),
            (PromptSegment::Summary, summary),
            (
                PromptSegment::RecentHistory,
                render_history(memory.recent(session.planner.recent_entries())),
            ),
            (PromptSegment::StepResults, working.to_prompt_section().trim_end().to_string()),
        ];
        let system = join_segments(&session.planner.budget().allocate(&segments));
        let user = if step.kind() == StepKind::Reason {
            format!("Intermediate step (not shown to the user): {instruction}")
        } else {
            instruction
        };
        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{head}...")
}

/// 从头执行整个计划（不写检查点）
pub async fn run_plan(
    plan: Plan,
    session: &PlanSession<'_>,
    memory: &mut MemoryStore,
) -> Result<PlanReply, AgentError> {
    let mut run = PlanRun::new(plan);
    loop {
        if let StepProgress::Finished(reply) = run.run_step(session, memory).await? {
            return Ok(reply);
        }
    }
}
