//! 核心编排层：错误与恢复、时钟、状态、会话监管、构建器与主控循环

pub mod builder;
pub mod clock;
pub(crate) mod conversation;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_llm_from_config, create_orchestrator, AgentBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation::ConversationId;
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{Orchestrator, OrchestratorParts};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{AgentPhase, AgentState};
