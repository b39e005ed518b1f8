//! LLM 层：推理能力抽象与实现（OpenAI 兼容 / Mock / Scripted）、嵌入

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{EmbeddingProvider, OpenAiEmbedder};
pub use mock::{MockLlmClient, ScriptStep, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use traits::{ChatMessage, ChatRole, CompletionConstraints, LlmClient, LlmError};
