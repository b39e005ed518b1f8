//! 计划执行过程事件：供观察者（日志、前端）展示规划与各步骤进度

use serde::Serialize;

use crate::react::StepKind;

/// 单条过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    /// 正在请求模型生成计划
    Planning { conversation_id: String },
    /// 计划已就绪（fallback 为 true 表示规划失败后的单步兜底）
    PlanReady {
        conversation_id: String,
        steps: Vec<StepKind>,
        fallback: bool,
    },
    StepStarted {
        conversation_id: String,
        index: usize,
        kind: StepKind,
    },
    /// 步骤完成（预览截断，避免过长）
    StepFinished {
        conversation_id: String,
        index: usize,
        preview: String,
    },
    /// 步骤失败但计划继续
    StepFailed {
        conversation_id: String,
        index: usize,
        kind: String,
        message: String,
    },
    ResponseReady {
        conversation_id: String,
        degraded: bool,
    },
}
