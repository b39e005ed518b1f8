//! 记忆层：有界短期记忆（条目 + 滚动摘要）、摘要器、单次计划的工作记忆、token 估算

pub mod conversation;
pub mod summarizer;
pub mod token_budget;
pub mod working;

pub use conversation::{
    MemoryConfig, MemoryCounters, MemoryEntry, MemoryRole, MemorySnapshot, MemoryStore,
};
pub use summarizer::{Summarizer, TruncatingSummarizer};
pub use token_budget::{PromptSegment, TokenBudget, TokenEstimator};
pub use working::WorkingMemory;
