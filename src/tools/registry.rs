//! 工具注册表
//!
//! 每个工具由 ToolSpec 描述（名称、描述、输入/输出 Schema、句柄）；句柄是封闭的 ToolHandle 枚举，
//! 内置工具直接分派，第三方工具通过 Tool trait 以 Custom 变体接入。注册表按名称有序存储，名称重复时报错。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{WebSearchSection, WikipediaSection};
use crate::core::{AgentError, Clock};
use crate::tools::schema::ToolSchema;
use crate::tools::web_search::WebSearchTool;
use crate::tools::wikipedia::WikipediaTool;
use crate::tools::{calculator, clock, echo, web_search, wikipedia};

/// 第三方工具 trait：名称、描述（供 LLM 理解）、输入 / 输出 Schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 默认接受任意对象
    fn input_schema(&self) -> ToolSchema {
        ToolSchema::any_object()
    }

    fn output_schema(&self) -> ToolSchema {
        ToolSchema::any()
    }

    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// 工具句柄
#[derive(Clone)]
pub enum ToolHandle {
    Calculator,
    Echo,
    Clock(Arc<dyn Clock>),
    Wikipedia(WikipediaTool),
    WebSearch(WebSearchTool),
    Custom(Arc<dyn Tool>),
}

impl fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolHandle::Calculator => f.write_str("Calculator"),
            ToolHandle::Echo => f.write_str("Echo"),
            ToolHandle::Clock(_) => f.write_str("Clock"),
            ToolHandle::Wikipedia(_) => f.write_str("Wikipedia"),
            ToolHandle::WebSearch(_) => f.write_str("WebSearch"),
            ToolHandle::Custom(t) => write!(f, "Custom({})", t.name()),
        }
    }
}

impl ToolHandle {
    pub async fn execute(&self, args: Value) -> Result<Value, String> {
        match self {
            ToolHandle::Calculator => calculator::execute(args),
            ToolHandle::Echo => echo::execute(args),
            ToolHandle::Clock(c) => clock::execute(c),
            ToolHandle::Wikipedia(w) => w.execute(args).await,
            ToolHandle::WebSearch(w) => w.execute(args).await,
            ToolHandle::Custom(t) => t.execute(args).await,
        }
    }
}

/// 工具描述
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: ToolSchema,
    pub output_schema: ToolSchema,
    pub handle: ToolHandle,
}

impl ToolSpec {
    pub fn calculator() -> Self {
        Self {
            name: "calculator".to_string(),
            description: calculator::DESCRIPTION.to_string(),
            input_schema: ToolSchema::of::<calculator::CalculatorInput>(),
            output_schema: ToolSchema::of::<calculator::CalculatorOutput>(),
            handle: ToolHandle::Calculator,
        }
    }

    pub fn echo() -> Self {
        Self {
            name: "echo".to_string(),
            description: echo::DESCRIPTION.to_string(),
            input_schema: ToolSchema::of::<echo::EchoInput>(),
            output_schema: ToolSchema::of::<echo::EchoOutput>(),
            handle: ToolHandle::Echo,
        }
    }

    pub fn clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            name: "clock".to_string(),
            description: clock::DESCRIPTION.to_string(),
            input_schema: ToolSchema::of::<clock::ClockInput>(),
            output_schema: ToolSchema::of::<clock::ClockOutput>(),
            handle: ToolHandle::Clock(clock),
        }
    }

    pub fn wikipedia(cfg: &WikipediaSection) -> Result<Self, AgentError> {
        let tool = WikipediaTool::new(cfg).map_err(AgentError::Config)?;
        Ok(Self {
            name: "wikipedia".to_string(),
            description: wikipedia::DESCRIPTION.to_string(),
            input_schema: ToolSchema::of::<wikipedia::WikipediaInput>(),
            output_schema: ToolSchema::of::<wikipedia::WikipediaOutput>(),
            handle: ToolHandle::Wikipedia(tool),
        })
    }

    pub fn web_search(cfg: &WebSearchSection) -> Result<Self, AgentError> {
        let tool = WebSearchTool::new(cfg).map_err(AgentError::Config)?;
        Ok(Self {
            name: "web_search".to_string(),
            description: web_search::DESCRIPTION.to_string(),
            input_schema: ToolSchema::of::<web_search::WebSearchInput>(),
            output_schema: ToolSchema::of::<web_search::WebSearchOutput>(),
            handle: ToolHandle::WebSearch(tool),
        })
    }

    pub fn custom(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
            output_schema: tool.output_schema(),
            handle: ToolHandle::Custom(tool),
        }
    }
}

/// 工具注册表：按名称有序存储 ToolSpec
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 名称已存在时返回 DuplicateTool，原注册不受影响
    pub fn register(&mut self, spec: ToolSpec) -> Result<(), AgentError> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(AgentError::Config("tool name must not be empty".to_string()));
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.tools.insert(name, spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 工具目录（name / description / parameters / returns），拼入规划提示
    pub fn catalog_json(&self) -> Value {
        Value::Array(
            self.tools
                .values()
                .map(|spec| {
                    json!({
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.input_schema,
                        "returns": spec.output_schema,
                    })
                })
                .collect(),
        )
    }

    /// 人类可读的工具列表
    pub fn tools_prompt(&self) -> String {
        if self.tools.is_empty() {
            return "No tools available.".to_string();
        }
        let blocks: Vec<String> = self
            .tools
            .values()
            .map(|spec| {
                let params = spec
                    .input_schema
                    .as_value()
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| {
                        props
                            .iter()
                            .map(|(name, p)| {
                                let desc = p
                                    .get("description")
                                    .and_then(Value::as_str)
                                    .or_else(|| p.get("type").and_then(Value::as_str))
                                    .unwrap_or("any");
                                format!("  - {name}: {desc}")
                            })
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "  (none)".to_string());
                format!(
                    "Tool: {}\nDescription: {}\nParameters:\n{}",
                    spec.name, spec.description, params
                )
            })
            .collect();
        format!("Available Tools:\n\n{}", blocks.join("\n\n"))
    }
}
