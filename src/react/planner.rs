//! Planner：把任务拆成经过校验的 Plan
//!
//! 提示 = 人设 + 计划格式（schemars 生成的 JSON Schema）+ 工具目录 + 滚动摘要 + 最近对话，按 TokenBudget 截断。
//! 不合法的输出带拒绝原因重新提示，最多 max_plan_retries 次；推理超时按 capability_retries 重试；
//! 仍失败时退回单步 respond 计划（fallback）。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::PlannerSection;
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::llm::{ChatMessage, CompletionConstraints, LlmClient, LlmError};
use crate::memory::{MemoryEntry, MemorySnapshot, PromptSegment, TokenBudget, TokenEstimator};
use crate::persona::Persona;
use crate::react::plan::{parse_plan, plan_format_schema, validate_plan, Plan};
use crate::tools::ToolRegistry;

/// Planner：持有推理能力、恢复策略与规划参数
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    recovery: RecoveryEngine,
    max_plan_steps: usize,
    reasoning_timeout: Duration,
    budget: TokenBudget,
    recent_entries: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, cfg: &PlannerSection) -> Self {
        Self {
            llm,
            recovery: RecoveryEngine::from_config(cfg),
            max_plan_steps: cfg.max_plan_steps.max(1),
            reasoning_timeout: Duration::from_secs(cfg.reasoning_timeout_secs.max(1)),
            budget: TokenBudget::new(cfg.prompt_budget.max(1)),
            recent_entries: 12,
        }
    }

    pub fn with_reasoning_timeout(mut self, reasoning_timeout: Duration) -> Self {
        self.reasoning_timeout = reasoning_timeout;
        self
    }

    pub fn with_recent_entries(mut self, n: usize) -> Self {
        self.recent_entries = n;
        self
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn recent_entries(&self) -> usize {
        self.recent_entries
    }

    /// 生成计划；本方法不失败，规划失败时返回 fallback 计划
    pub async fn plan(
        &self,
        task: &str,
        persona: &Persona,
        memory: &MemorySnapshot,
        tools: &ToolRegistry,
    ) -> Plan {
        let system = self.planning_prompt(persona, memory, tools);
        let mut messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(format!(
                "Task: {task}\n\nReply with the JSON plan for this task and nothing else."
            )),
        ];
        let constraints = CompletionConstraints::json();
        let mut capability_failures = 0usize;
        let mut plan_failures = 0usize;

        loop {
            let output = match self.complete(&messages, &constraints).await {
                Ok(output) => output,
                Err(e) => {
                    capability_failures += 1;
                    match self.recovery.handle(&e, capability_failures) {
                        RecoveryAction::Retry => {
                            warn!(error = %e, attempt = capability_failures, "planning call failed, retrying");
                            continue;
                        }
                        _ => {
                            warn!(error = %e, "reasoning unavailable, using fallback plan");
                            return Plan::fallback(task);
                        }
                    }
                }
            };

            let candidate = parse_plan(&output).map(|draft| Plan::from_draft(task, draft));
            let checked = candidate.and_then(|plan| {
                validate_plan(&plan, tools, self.max_plan_steps)?;
                Ok(plan)
            });
            match checked {
                Ok(plan) => {
                    info!(steps = plan.steps.len(), resumable = plan.resumable, "plan accepted");
                    return plan;
                }
                Err(e) => {
                    plan_failures += 1;
                    match self.recovery.handle(&e, plan_failures) {
                        RecoveryAction::Reprompt(feedback) => {
                            warn!(error = %e, attempt = plan_failures, "plan rejected, re-prompting");
                            messages.push(ChatMessage::assistant(output));
                            messages.push(ChatMessage::user(feedback));
                        }
                        _ => {
                            warn!(error = %e, "plan retries exhausted, using fallback plan");
                            return Plan::fallback(task);
                        }
                    }
                }
            }
        }
    }

    /// 单次推理调用，施加超时并映射错误
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        constraints: &CompletionConstraints,
    ) -> Result<String, AgentError> {
        let prompt_tokens: usize = messages.iter().map(|m| TokenEstimator::estimate(&m.content)).sum();
        debug!(llm = self.llm.name(), prompt_tokens, "reasoning call");
        match timeout(self.reasoning_timeout, self.llm.complete(messages, constraints)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(LlmError::Timeout)) => Err(AgentError::CapabilityTimeout("reasoning".to_string())),
            Ok(Err(LlmError::Capability(msg))) => Err(AgentError::Capability(msg)),
            Err(_) => Err(AgentError::CapabilityTimeout(format!(
                "reasoning exceeded {}ms",
                self.reasoning_timeout.as_millis()
            ))),
        }
    }

    /// 带重试的推理调用（reason / respond 步骤使用）
    pub async fn complete_with_retry(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let constraints = CompletionConstraints::default();
        let mut failures = 0usize;
        loop {
            match self.complete(messages, &constraints).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    failures += 1;
                    if self.recovery.handle(&e, failures) != RecoveryAction::Retry {
                        return Err(e);
                    }
                    warn!(error = %e, attempt = failures, "reasoning call failed, retrying");
                }
            }
        }
    }

    /// 规划用 system 提示
    pub fn planning_prompt(&self, persona: &Persona, memory: &MemorySnapshot, tools: &ToolRegistry) -> String {
        let schema = serde_json::to_string_pretty(&plan_format_schema()).unwrap_or_default();
        let plan_format = format!(
            "Plan how to answer the user's task. Reply with a single JSON object matching the schema below. \
             Steps run in order and are numbered from 0. Available step kinds: \
             `reason` (intermediate thinking), `retrieve` (look up the knowledge base), \
             `invoke_tool` (call one of the available tools with JSON args), and `respond`. \
             The last step must be the only `respond` step. A string argument may contain \
             {{{{step:N}}}} to use the output of step N; list N in that step's `depends_on`. Set `resumable` to true only for long plans.\n\n\
             Schema:\n{schema}"
        );
        let catalog = if tools.is_empty() {
            String::new()
        } else {
            tools.tools_prompt()
        };
        let summary = if memory.summary.is_empty() {
            String::new()
        } else {
            format!("Conversation summary:\n{}", memory.summary)
        };

        let start = memory.entries.len().saturating_sub(self.recent_entries);
        let segments = vec![
            (PromptSegment::Persona, persona.system_prompt()),
            (PromptSegment::PlanFormat, plan_format),
            (PromptSegment::ToolCatalog, catalog),
            (PromptSegment::Summary, summary),
            (PromptSegment::RecentHistory, render_history(&memory.entries[start..])),
        ];
        let prompt = join_segments(&self.budget.allocate(&segments));
        debug!(tokens = TokenEstimator::estimate(&prompt), "planning prompt built");
        prompt
    }
}

/// 按 `role: content` 逐行渲染最近对话
pub fn render_history(recent: &[MemoryEntry]) -> String {
    if recent.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = recent
        .iter()
        .map(|e| format!("{}: {}", e.role, e.content))
        .collect();
    format!("Recent conversation:\n{}", lines.join("\n"))
}

pub(crate) fn join_segments(segments: &[(PromptSegment, String)]) -> String {
    segments
        .iter()
        .map(|(_, s)| s.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatRole, ScriptedLlmClient};
    use crate::react::StepKind;
    use crate::tools::ToolSpec;

    fn tools() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSpec::calculator()).unwrap();
        registry
    }

    fn persona() -> Persona {
        Persona::builder("Ada").with_description("A careful assistant.").build().unwrap()
    }

    fn planner(llm: Arc<ScriptedLlmClient>) -> Planner {
        Planner::new(llm, &PlannerSection::default())
    }

    #[tokio::test]
    async fn test_plan_accepts_valid_json() {
        let llm = Arc::new(ScriptedLlmClient::new().with_reply(
            r#"```json
{"steps": [{"kind": "invoke_tool", "tool": "calculator", "args": {"expression": "2+2"}},
           {"kind": "respond", "depends_on": [0]}]}
```"#,
        ));
        let plan = planner(llm.clone())
            .plan("What's 2+2?", &persona(), &MemorySnapshot::default(), &tools())
            .await;
        assert!(!plan.fallback);
        assert_eq!(
            plan.steps.iter().map(|s| s.kind()).collect::<Vec<_>>(),
            vec![StepKind::InvokeTool, StepKind::Respond]
        );
        assert_eq!(plan.steps[1].depends_on, vec![0]);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_plan_reprompts_with_reason() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .with_reply(r#"{"steps": [{"kind": "invoke_tool", "tool": "shell"}, {"kind": "respond"}]}"#)
                .with_reply(r#"{"steps": [{"kind": "respond"}]}"#),
        );
        let plan = planner(llm.clone())
            .plan("hi", &persona(), &MemorySnapshot::default(), &tools())
            .await;
        assert!(!plan.fallback);
        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        let last = calls[1].last().unwrap();
        assert_eq!(last.role, ChatRole::User);
        assert!(last.content.contains("unknown tool `shell`"));
    }

    #[tokio::test]
    async fn test_plan_falls_back_after_retries() {
        let llm = Arc::new(ScriptedLlmClient::new().with_fallback("not json at all"));
        let plan = planner(llm.clone())
            .plan("hi", &persona(), &MemorySnapshot::default(), &tools())
            .await;
        assert!(plan.fallback);
        assert_eq!(plan.steps.len(), 1);
        // 首次 + max_plan_retries(2)
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_capability_timeout_retried_then_fallback() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .with_failure(LlmError::Timeout)
                .with_failure(LlmError::Timeout)
                .with_failure(LlmError::Timeout),
        );
        let plan = planner(llm.clone())
            .plan("hi", &persona(), &MemorySnapshot::default(), &tools())
            .await;
        assert!(plan.fallback);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_slow_reasoning_maps_to_capability_timeout() {
        let llm = Arc::new(
            ScriptedLlmClient::new().with_delayed_reply(Duration::from_millis(500), "late"),
        );
        let planner = planner(llm).with_reasoning_timeout(Duration::from_millis(20));
        let err = planner
            .complete(&[ChatMessage::user("hi")], &CompletionConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::CapabilityTimeout(_)));
    }

    #[test]
    fn test_planning_prompt_contains_sections() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let memory = MemorySnapshot {
            summary: "user: earlier question".to_string(),
            ..MemorySnapshot::default()
        };
        let prompt = planner(llm).planning_prompt(&persona(), &memory, &tools());
        assert!(prompt.starts_with("You are Ada."));
        assert!(prompt.contains("Tool: calculator"));
        assert!(prompt.contains("Conversation summary:\nuser: earlier question"));
        assert!(prompt.contains("{{step:N}}"));
    }

    #[test]
    fn test_prompt_budget_comes_from_config() {
        let cfg = PlannerSection {
            prompt_budget: 1500,
            ..PlannerSection::default()
        };
        let tight = Planner::new(Arc::new(ScriptedLlmClient::new()), &cfg);
        assert_eq!(tight.budget().total_budget(), 1500);
        assert_eq!(planner(Arc::new(ScriptedLlmClient::new())).budget().total_budget(), 6000);
    }
}
