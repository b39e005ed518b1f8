//! Echo 工具（测试用）

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoInput {
    pub text: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct EchoOutput {
    pub text: String,
}

pub const DESCRIPTION: &str = "Echo text back (for testing). Args: {\"text\": \"message\"}";

pub fn execute(args: Value) -> Result<Value, String> {
    let input: EchoInput = serde_json::from_value(args).map_err(|e| e.to_string())?;
    serde_json::to_value(EchoOutput { text: input.text }).map_err(|e| e.to_string())
}
