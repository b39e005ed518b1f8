//! 计划：步骤类型、LLM 输出解析、校验与步骤结果
//!
//! Planner 要求模型输出 `{"steps": [...], "resumable": false}`；parse_plan 从文本中提取 JSON（```json 代码块或首个 `{` 到最后一个 `}`），
//! validate_plan 按规则拒绝不合法的计划。步骤编号从 0 开始，工具参数中的 `{{step:N}}` 会被替换为第 N 步的输出，N 必须出现在该步的 depends_on 中。

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::retrieval::{format_context, ContextChunk};
use crate::tools::ToolRegistry;

/// 单步动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// 中间推理（不对用户可见）
    Reason { instruction: String },
    /// 从知识库检索上下文
    Retrieve {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        k: Option<usize>,
    },
    /// 调用已注册的工具
    InvokeTool {
        tool: String,
        /// 省略时为空对象
        #[serde(default = "empty_args")]
        args: Value,
    },
    /// 生成最终回复，必须是最后一步
    Respond {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instruction: Option<String>,
    },
}

fn empty_args() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Reason,
    Retrieve,
    InvokeTool,
    Respond,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepKind::Reason => "reason",
            StepKind::Retrieve => "retrieve",
            StepKind::InvokeTool => "invoke_tool",
            StepKind::Respond => "respond",
        })
    }
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::Reason { .. } => StepKind::Reason,
            StepAction::Retrieve { .. } => StepKind::Retrieve,
            StepAction::InvokeTool { .. } => StepKind::InvokeTool,
            StepAction::Respond { .. } => StepKind::Respond,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    pub action: StepAction,
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

impl PlanStep {
    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub task: String,
    pub steps: Vec<PlanStep>,
    /// 每步完成后写检查点
    #[serde(default)]
    pub resumable: bool,
    /// 规划失败后的单步兜底计划
    #[serde(default)]
    pub fallback: bool,
}

impl Plan {
    /// 单步 respond 兜底计划
    pub fn fallback(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            steps: vec![PlanStep {
                index: 0,
                action: StepAction::Respond { instruction: None },
                depends_on: Vec::new(),
            }],
            resumable: false,
            fallback: true,
        }
    }

    pub fn from_draft(task: impl Into<String>, draft: PlanDraft) -> Self {
        Self {
            task: task.into(),
            steps: draft
                .steps
                .into_iter()
                .enumerate()
                .map(|(index, s)| PlanStep {
                    index,
                    action: s.action,
                    depends_on: s.depends_on,
                })
                .collect(),
            resumable: draft.resumable,
            fallback: false,
        }
    }
}

/// 模型输出的计划格式（同时用于生成提示中的 JSON Schema）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlanDraft {
    /// 按执行顺序排列，编号从 0 开始；最后一步必须是唯一的 respond
    pub steps: Vec<DraftStep>,
    /// 长计划可设为 true，中断后可从检查点恢复
    #[serde(default)]
    pub resumable: bool,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DraftStep {
    #[serde(flatten)]
    pub action: StepAction,
    /// 本步需要看到其输出的前序步骤编号
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

/// 计划格式的 JSON Schema
pub fn plan_format_schema() -> Value {
    serde_json::to_value(schema_for!(PlanDraft)).unwrap_or(Value::Null)
}

fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    let obj = trimmed.find('{');
    let arr = trimmed.find('[');
    let (open, close) = match (obj, arr) {
        (Some(o), Some(a)) if a < o => ('[', ']'),
        (None, Some(_)) => ('[', ']'),
        _ => ('{', '}'),
    };
    match (trimmed.find(open), trimmed.rfind(close)) {
        (Some(s), Some(e)) if s < e => &trimmed[s..=e],
        _ => trimmed,
    }
}

/// 解析模型输出；接受完整对象或裸步骤数组
pub fn parse_plan(output: &str) -> Result<PlanDraft, AgentError> {
    let json = extract_json(output);
    if json.starts_with('[') {
        let steps: Vec<DraftStep> = serde_json::from_str(json)
            .map_err(|e| AgentError::InvalidPlan(format!("unparseable plan: {e}")))?;
        return Ok(PlanDraft {
            steps,
            resumable: false,
        });
    }
    serde_json::from_str(json).map_err(|e| AgentError::InvalidPlan(format!("unparseable plan: {e}")))
}

/// 校验计划；违规时返回 InvalidPlan(原因)
pub fn validate_plan(plan: &Plan, tools: &ToolRegistry, max_steps: usize) -> Result<(), AgentError> {
    let reject = |reason: String| -> Result<(), AgentError> { Err(AgentError::InvalidPlan(reason)) };
    if plan.steps.is_empty() {
        return reject("plan has no steps".to_string());
    }
    if plan.steps.len() > max_steps {
        return reject(format!(
            "plan has {} steps, at most {max_steps} allowed",
            plan.steps.len()
        ));
    }
    let last = plan.steps.len() - 1;
    for step in &plan.steps {
        match &step.action {
            StepAction::Respond { .. } if step.index != last => {
                return reject(format!("step {} is a respond step but is not last", step.index));
            }
            StepAction::InvokeTool { tool, .. } if !tools.contains(tool) => {
                return reject(format!("step {} uses unknown tool `{tool}`", step.index));
            }
            StepAction::Retrieve { query, .. } if query.trim().is_empty() => {
                return reject(format!("step {} has an empty retrieve query", step.index));
            }
            _ => {}
        }
        if let Some(dep) = step.depends_on.iter().find(|&&d| d >= step.index) {
            return reject(format!(
                "step {} depends on step {dep}, which does not precede it",
                step.index
            ));
        }
        if let StepAction::InvokeTool { args, .. } = &step.action {
            let mut refs = Vec::new();
            placeholder_refs(args, &mut refs);
            if let Some(n) = refs.iter().find(|&&n| !step.depends_on.contains(&n)) {
                return reject(format!(
                    "step {} uses {{{{step:{n}}}}} but does not list step {n} in depends_on",
                    step.index
                ));
            }
        }
    }
    if plan.steps[last].kind() != StepKind::Respond {
        return reject("the last step must be a respond step".to_string());
    }
    Ok(())
}

/// 单步结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StepOutcome {
    Text(String),
    Context(Vec<ContextChunk>),
    ToolOutput(Value),
    Error { kind: String, message: String },
}

impl StepOutcome {
    pub fn error(err: &AgentError) -> Self {
        StepOutcome::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StepOutcome::Error { .. })
    }

    /// 拼入提示的文本
    pub fn render(&self) -> String {
        match self {
            StepOutcome::Text(t) => t.clone(),
            StepOutcome::Context(chunks) if chunks.is_empty() => "(no relevant context found)".to_string(),
            StepOutcome::Context(chunks) => format_context(chunks),
            StepOutcome::ToolOutput(v) => v.to_string(),
            StepOutcome::Error { kind, message } => format!("[{kind}] {message}"),
        }
    }

    /// `{{step:N}}` 的替换文本：单字段对象取其值
    pub fn placeholder_text(&self) -> String {
        match self {
            StepOutcome::ToolOutput(Value::Object(map)) if map.len() == 1 => {
                match map.values().next() {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => format_number(n),
                    Some(other) => other.to_string(),
                    None => String::new(),
                }
            }
            StepOutcome::ToolOutput(Value::String(s)) => s.clone(),
            other => other.render(),
        }
    }
}

fn format_number(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub kind: StepKind,
    pub outcome: StepOutcome,
}

/// 可恢复计划的检查点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanCheckpoint {
    pub plan: Plan,
    pub completed: Vec<StepRecord>,
    pub next_step: usize,
}

static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();

fn placeholder_regex() -> Option<&'static Regex> {
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{\s*step:(\d+)\s*\}\}").ok())
        .as_ref()
}

/// 参数中所有 `{{step:N}}` 引用的步骤编号
fn placeholder_refs(args: &Value, out: &mut Vec<usize>) {
    match args {
        Value::String(s) => {
            if let Some(re) = placeholder_regex() {
                out.extend(re.captures_iter(s).filter_map(|caps| caps[1].parse::<usize>().ok()));
            }
        }
        Value::Array(items) => items.iter().for_each(|v| placeholder_refs(v, out)),
        Value::Object(map) => map.values().for_each(|v| placeholder_refs(v, out)),
        _ => {}
    }
}

/// 递归替换字符串参数中的 `{{step:N}}`；未知编号保持原样。validate_plan 保证引用的步骤都在 depends_on 中
pub fn resolve_placeholders(args: &Value, records: &[StepRecord]) -> Value {
    match args {
        Value::String(s) => {
            let Some(re) = placeholder_regex() else {
                return args.clone();
            };
            let replaced = re.replace_all(s, |caps: &regex::Captures<'_>| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| records.iter().find(|r| r.index == n))
                    .map(|r| r.outcome.placeholder_text())
                    .unwrap_or_else(|| caps[0].to_string())
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_placeholders(v, records)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_placeholders(v, records)))
                .collect(),
        ),
        other => other.clone(),
    }
}
