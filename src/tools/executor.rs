//! 工具调用器
//!
//! 持有只读的 ToolRegistry 与全局超时。invoke(name, args)：查找 → 校验输入 → 超时内执行 → 校验输出，
//! 失败统一转为 AgentError（ToolNotFound / SchemaMismatch / ToolExecution）；每次调用输出结构化审计日志（JSON）。
//! 调用器不接触记忆或计划状态。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

/// 工具调用器：对每次调用施加超时，并将结果映射为 AgentError
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        self.invoke_cancellable(name, args, &CancellationToken::new())
            .await
    }

    /// 与取消令牌竞争；取消时丢弃未完成的调用并返回 Cancelled
    pub async fn invoke_cancellable(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, AgentError> {
        let start = Instant::now();
        let preview = args_preview(&args);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = self.run(name, args) => r,
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::ToolExecution { cause, .. }) if cause.starts_with("timed out") => "timeout",
            Err(e) => e.kind(),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    async fn run(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        let spec = self
            .registry
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        spec.input_schema
            .validate(&args)
            .map_err(|reason| AgentError::SchemaMismatch {
                tool: name.to_string(),
                reason,
            })?;

        let output = match timeout(self.timeout, spec.handle.execute(args)).await {
            Ok(Ok(v)) => v,
            Ok(Err(cause)) => {
                return Err(AgentError::ToolExecution {
                    tool: name.to_string(),
                    cause,
                })
            }
            Err(_) => {
                return Err(AgentError::ToolExecution {
                    tool: name.to_string(),
                    cause: format!("timed out after {}ms", self.timeout.as_millis()),
                })
            }
        };

        spec.output_schema
            .validate(&output)
            .map_err(|reason| AgentError::ToolExecution {
                tool: name.to_string(),
                cause: format!("invalid output: {reason}"),
            })?;
        Ok(output)
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
