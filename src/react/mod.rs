//! 认知层：推理策略、计划（解析 / 校验 / 步骤结果）、Planner、逐步执行的计划循环

pub mod events;
pub mod loop_;
pub mod plan;
pub mod planner;
pub mod strategy;

pub use events::PlanEvent;
pub use loop_::{run_plan, PlanReply, PlanRun, PlanSession, StepProgress};
pub use plan::{
    parse_plan, plan_format_schema, resolve_placeholders, validate_plan, DraftStep, Plan, PlanCheckpoint,
    PlanDraft, PlanStep, StepAction, StepKind, StepOutcome, StepRecord,
};
pub use planner::{render_history, Planner};
pub use strategy::ReasoningStrategy;
