//! Hive - Rust 单智能体执行核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、状态、恢复、会话监管、构建器
//! - **llm**: 推理能力抽象与实现（OpenAI 兼容 / Mock / 脚本化）、嵌入
//! - **memory**: 有界短期记忆、滚动摘要、计划内工作记忆、token 预算
//! - **persona**: 人设（身份、语气、规则、推理策略）
//! - **react**: 计划格式、Planner、逐步执行循环、推理策略
//! - **retrieval**: 检索后端（关键词 / 向量）与 ContextRetriever
//! - **store**: BlobStore（内存 / 文件 / SQLite）与 AgentState 序列化
//! - **tools**: 工具注册表、调用器与内置工具（calculator、echo、clock、wikipedia、web_search）

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod persona;
pub mod react;
pub mod retrieval;
pub mod store;
pub mod tools;

pub use crate::core::{AgentBuilder, AgentError, AgentPhase, AgentState, ConversationId, Orchestrator};
pub use crate::persona::Persona;
