//! 推理策略：决定 respond 步骤的提示格式与回复后处理
//!
//! Direct 不附加任何格式；React / ChainOfThought / Reflection 要求模型以 "Final Answer:" 收尾，
//! 回复取最后一个标记之后的文本。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const FINAL_ANSWER_MARKER: &str = "Final Answer:";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStrategy {
    #[default]
    Direct,
    React,
    ChainOfThought,
    Reflection,
}

impl ReasoningStrategy {
    /// 在任务外包一层策略格式；Direct 原样返回
    pub fn build_prompt(&self, task: &str) -> String {
        match self {
            ReasoningStrategy::Direct => task.to_string(),
            ReasoningStrategy::React => format!(
                "Approach this task using the following steps:\n\
                 1) Thought: Analyze what needs to be done\n\
                 2) Action: Decide on the next action\n\
                 3) Observation: Observe the result\n\
                 4) Repeat until task is complete\n\n\
                 Follow this format for your response:\n\
                 Thought: [Your reasoning about the current situation]\n\
                 Action: [The action you decide to take]\n\
                 Observation: [What you observe after the action]\n\
                 ... (continue steps as needed)\n\
                 Final Answer: [Your final response to the task]\n\n\
                 Task: {task}"
            ),
            ReasoningStrategy::ChainOfThought => format!(
                "Let's solve this step by step:\n\n\
                 Task: {task}\n\n\
                 Please break down your thinking into clear steps:\n\
                 1) First, ...\n\
                 2) Then, ...\n\
                 (continue with your step-by-step reasoning)\n\n\
                 Final Answer: [Your conclusion based on the above reasoning]"
            ),
            ReasoningStrategy::Reflection => format!(
                "Complete this task using reflection:\n\n\
                 Task: {task}\n\n\
                 1) Initial Approach: what is your first impression, and which assumptions are you making?\n\
                 2) Analysis: what could go wrong, and which alternatives exist?\n\
                 3) Refined Solution: which approach is best after reflection?\n\n\
                 Final Answer: [Your solution, with a brief justification]"
            ),
        }
    }

    /// 提取最终回答；没有标记时返回去首尾空白的原文
    pub fn process_response(&self, response: &str) -> String {
        if *self == ReasoningStrategy::Direct {
            return response.trim().to_string();
        }
        match response.rfind(FINAL_ANSWER_MARKER) {
            Some(pos) => {
                let answer = response[pos + FINAL_ANSWER_MARKER.len()..].trim();
                if answer.is_empty() {
                    response.trim().to_string()
                } else {
                    answer.to_string()
                }
            }
            None => response.trim().to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningStrategy::Direct => "direct",
            ReasoningStrategy::React => "react",
            ReasoningStrategy::ChainOfThought => "chain_of_thought",
            ReasoningStrategy::Reflection => "reflection",
        }
    }
}

impl fmt::Display for ReasoningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ReasoningStrategy::Direct),
            "react" | "reactstrategy" => Ok(ReasoningStrategy::React),
            "chain_of_thought" | "cot" | "chainofthoughtstrategy" => {
                Ok(ReasoningStrategy::ChainOfThought)
            }
            "reflection" | "reflectionstrategy" => Ok(ReasoningStrategy::Reflection),
            other => Err(format!("Unknown strategy: {other}")),
        }
    }
}
