//! 人设描述：名称、描述、行为规则、语气标签、全局指令与推理策略
//!
//! 通过 PersonaBuilder 构造后不可变，以 Arc<Persona> 在会话间共享；也可从 TOML 文件加载。

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::react::ReasoningStrategy;

/// 不可变的人设
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    name: String,
    description: String,
    rules: Vec<String>,
    tone: Vec<String>,
    instruction: Option<String>,
    strategy: ReasoningStrategy,
}

impl Persona {
    pub fn builder(name: impl Into<String>) -> PersonaBuilder {
        PersonaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// 按顺序排列的行为规则
    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    pub fn tone(&self) -> &[String] {
        &self.tone
    }

    pub fn instruction(&self) -> Option<&str> {
        self.instruction.as_deref()
    }

    pub fn strategy(&self) -> ReasoningStrategy {
        self.strategy
    }

    /// 从 TOML 字符串解析（字段同 PersonaFile），经 builder 校验
    pub fn from_toml_str(s: &str) -> Result<Self, AgentError> {
        let file: PersonaFile =
            toml::from_str(s).map_err(|e| AgentError::Config(format!("persona: {e}")))?;
        file.into_builder().build()
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("persona {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// 渲染为系统提示的人设段落
    pub fn system_prompt(&self) -> String {
        let mut out = format!("You are {}.", self.name);
        if !self.description.is_empty() {
            out.push(' ');
            out.push_str(&self.description);
        }
        if !self.tone.is_empty() {
            out.push_str(&format!("\nTone: {}.", self.tone.join(", ")));
        }
        if !self.rules.is_empty() {
            out.push_str("\n\nRules:");
            for (i, rule) in self.rules.iter().enumerate() {
                out.push_str(&format!("\n{}. {}", i + 1, rule));
            }
        }
        if let Some(instruction) = &self.instruction {
            out.push_str("\n\n");
            out.push_str(instruction);
        }
        out
    }
}

/// Persona 的 TOML 文件格式
#[derive(Debug, Deserialize)]
struct PersonaFile {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    rules: Vec<String>,
    #[serde(default)]
    tone: Vec<String>,
    instruction: Option<String>,
    #[serde(default)]
    strategy: ReasoningStrategy,
}

impl PersonaFile {
    fn into_builder(self) -> PersonaBuilder {
        let mut b = PersonaBuilder::new(self.name)
            .with_description(self.description)
            .with_strategy(self.strategy);
        for rule in self.rules {
            b = b.with_rule(rule);
        }
        for tone in self.tone {
            b = b.with_tone(tone);
        }
        if let Some(instruction) = self.instruction {
            b = b.with_instruction(instruction);
        }
        b
    }
}

/// Persona 构建器
#[derive(Debug, Clone)]
pub struct PersonaBuilder {
    name: String,
    description: String,
    rules: Vec<String>,
    tone: Vec<String>,
    instruction: Option<String>,
    strategy: ReasoningStrategy,
}

impl PersonaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            rules: Vec::new(),
            tone: Vec::new(),
            instruction: None,
            strategy: ReasoningStrategy::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rules.push(rule.into());
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone.push(tone.into());
        self
    }

    /// 全局指令，附加在人设段落末尾
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_strategy(mut self, strategy: ReasoningStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 名称为空时返回 Config 错误
    pub fn build(self) -> Result<Persona, AgentError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AgentError::Config("persona name must not be empty".to_string()));
        }
        Ok(Persona {
            name,
            description: self.description.trim().to_string(),
            rules: self
                .rules
                .into_iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect(),
            tone: self.tone,
            instruction: self.instruction.filter(|s| !s.trim().is_empty()),
            strategy: self.strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_empty_name() {
        let err = PersonaBuilder::new("  ").build().unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_system_prompt_lists_rules_in_order() {
        let persona = Persona::builder("Ada")
            .with_description("A careful math tutor.")
            .with_rule("Show your work")
            .with_rule("Be brief")
            .with_tone("friendly")
            .with_instruction("Always answer in English.")
            .build()
            .unwrap();
        let prompt = persona.system_prompt();
        assert!(prompt.starts_with("You are Ada. A careful math tutor."));
        let first = prompt.find("1. Show your work").unwrap();
        let second = prompt.find("2. Be brief").unwrap();
        assert!(first < second);
        assert!(prompt.contains("Tone: friendly."));
        assert!(prompt.ends_with("Always answer in English."));
    }

    #[test]
    fn test_persona_from_toml() {
        let persona = Persona::from_toml_str(
            r#"
name = "Researcher"
description = "Finds sources."
rules = ["Cite sources"]
tone = ["neutral"]
strategy = "chain_of_thought"
"#,
        )
        .unwrap();
        assert_eq!(persona.name(), "Researcher");
        assert_eq!(persona.rules(), &["Cite sources".to_string()]);
        assert_eq!(persona.strategy(), ReasoningStrategy::ChainOfThought);
        assert!(persona.instruction().is_none());
    }
}
