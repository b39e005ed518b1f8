//! Clock 工具：返回当前 UTC 时间（取自注入的 Clock）

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::Clock;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ClockInput {}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ClockOutput {
    /// RFC 3339
    pub utc: String,
    pub unix: i64,
}

pub const DESCRIPTION: &str = "Return the current UTC date and time. Args: {}";

pub fn execute(clock: &Arc<dyn Clock>) -> Result<Value, String> {
    let now = clock.now();
    serde_json::to_value(ClockOutput {
        utc: now.to_rfc3339(),
        unix: now.timestamp(),
    })
    .map_err(|e| e.to_string())
}
