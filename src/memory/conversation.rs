//! 短期记忆：有界的对话条目存储
//!
//! 条目只追加；超过条目数或 token 预算时，最旧的 compact_batch 条被折叠进滚动摘要。
//! 摘要器失败时退化为直接丢弃该批次（记录在 dropped_entries 中），append 从不阻塞。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::MemorySection;
use crate::core::Clock;
use crate::memory::token_budget::{truncate_to_tokens, TokenEstimator};
use crate::memory::Summarizer;

/// 条目角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRole {
    User,
    Agent,
    Tool,
    System,
}

impl fmt::Display for MemoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryRole::User => "user",
            MemoryRole::Agent => "agent",
            MemoryRole::Tool => "tool",
            MemoryRole::System => "system",
        };
        f.write_str(s)
    }
}

/// 单条记忆
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: MemoryRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl MemoryEntry {
    pub fn new(role: MemoryRole, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryCounters {
    /// 累计追加条数
    pub total_appended: u64,
    /// 已折叠进摘要的条数（单调不减）
    pub summarized_entries: u64,
    /// 摘要失败后被直接丢弃的条数
    pub dropped_entries: u64,
    /// 活跃条目的估算 token 数
    pub retained_tokens: usize,
}

/// 记忆快照：条目 + 摘要 + 计数器
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub entries: Vec<MemoryEntry>,
    pub summary: String,
    pub counters: MemoryCounters,
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub max_entries: usize,
    pub max_tokens: usize,
    pub compact_batch: usize,
    pub recent_entries: usize,
}

impl From<&MemorySection> for MemoryConfig {
    fn from(s: &MemorySection) -> Self {
        Self {
            max_entries: s.max_entries.max(1),
            max_tokens: s.max_tokens.max(1),
            compact_batch: s.compact_batch.max(1),
            recent_entries: s.recent_entries,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::from(&MemorySection::default())
    }
}

/// 有界短期记忆
pub struct MemoryStore {
    config: MemoryConfig,
    summarizer: Arc<dyn Summarizer>,
    clock: Arc<dyn Clock>,
    entries: Vec<MemoryEntry>,
    summary: String,
    counters: MemoryCounters,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .field("counters", &self.counters)
            .finish()
    }
}

impl MemoryStore {
    pub fn new(config: MemoryConfig, summarizer: Arc<dyn Summarizer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            summarizer,
            clock,
            entries: Vec::new(),
            summary: String::new(),
            counters: MemoryCounters::default(),
        }
    }

    /// 从快照恢复；若快照超出当前预算则立即压缩
    pub fn from_snapshot(
        snapshot: MemorySnapshot,
        config: MemoryConfig,
        summarizer: Arc<dyn Summarizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut store = Self {
            config,
            summarizer,
            clock,
            entries: snapshot.entries,
            summary: snapshot.summary,
            counters: snapshot.counters,
        };
        store.recount_tokens();
        store.compact();
        store
    }

    /// 以当前时钟时间构造条目并追加
    pub fn record(&mut self, role: MemoryRole, content: impl Into<String>, metadata: Option<Value>) {
        let mut entry = MemoryEntry::new(role, content, self.clock.now());
        entry.metadata = metadata;
        self.append(entry);
    }

    /// 追加到尾部；需要时先同步压缩，保证追加后仍在预算内
    pub fn append(&mut self, mut entry: MemoryEntry) {
        if TokenEstimator::estimate(&entry.content) > self.config.max_tokens {
            entry.content = truncate_to_tokens(&entry.content, self.config.max_tokens);
            debug!(role = %entry.role, "memory entry truncated to fit token budget");
        }
        let incoming = TokenEstimator::estimate(&entry.content);
        while !self.entries.is_empty()
            && (self.entries.len() + 1 > self.config.max_entries
                || self.counters.retained_tokens + incoming > self.config.max_tokens)
        {
            self.fold_oldest();
        }
        self.entries.push(entry);
        self.counters.total_appended += 1;
        self.counters.retained_tokens += incoming;
    }

    /// 超出预算时折叠最旧批次；append 能产生的任何状态上都不做任何事
    pub fn compact(&mut self) {
        while !self.entries.is_empty() && self.is_over_budget() {
            self.fold_oldest();
        }
    }

    fn is_over_budget(&self) -> bool {
        self.entries.len() > self.config.max_entries
            || self.counters.retained_tokens > self.config.max_tokens
    }

    fn fold_oldest(&mut self) {
        let k = self.config.compact_batch.min(self.entries.len());
        let batch: Vec<MemoryEntry> = self.entries.drain(..k).collect();
        match self.summarizer.summarize(&self.summary, &batch) {
            Ok(summary) => {
                self.summary = summary;
                self.counters.summarized_entries += k as u64;
                debug!(folded = k, "memory compacted into summary");
            }
            Err(e) => {
                self.counters.dropped_entries += k as u64;
                warn!(dropped = k, error = %e, "summarizer failed, memory degraded to truncation");
            }
        }
        self.recount_tokens();
    }

    fn recount_tokens(&mut self) {
        self.counters.retained_tokens = self
            .entries
            .iter()
            .map(|e| TokenEstimator::estimate(&e.content))
            .sum();
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            entries: self.entries.clone(),
            summary: self.summary.clone(),
            counters: self.counters.clone(),
        }
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn counters(&self) -> &MemoryCounters {
        &self.counters
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// 最近 n 条（按时间顺序）
    pub fn recent(&self, n: usize) -> &[MemoryEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// 清空条目与摘要；计数器重置
    pub fn clear(&mut self) {
        self.entries.clear();
        self.summary.clear();
        self.counters = MemoryCounters::default();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::memory::TruncatingSummarizer;
    use chrono::TimeZone;

    struct FailingSummarizer;

    impl Summarizer for FailingSummarizer {
        fn summarize(&self, _previous: &str, _batch: &[MemoryEntry]) -> Result<String, String> {
            Err("summarizer offline".to_string())
        }
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()))
    }

    fn store(max_entries: usize, max_tokens: usize, batch: usize) -> MemoryStore {
        MemoryStore::new(
            MemoryConfig {
                max_entries,
                max_tokens,
                compact_batch: batch,
                recent_entries: 4,
            },
            Arc::new(TruncatingSummarizer::new(500)),
            clock(),
        )
    }

    #[test]
    fn test_append_within_budget_keeps_everything() {
        let mut m = store(10, 1000, 3);
        m.record(MemoryRole::User, "hello", None);
        m.record(MemoryRole::Agent, "hi there", None);
        assert_eq!(m.len(), 2);
        assert!(m.summary().is_empty());
        assert_eq!(m.counters().total_appended, 2);
        assert_eq!(m.entries()[0].timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_append_over_entry_budget_folds_oldest_batch() {
        let mut m = store(4, 1000, 2);
        for i in 0..5 {
            m.record(MemoryRole::User, format!("message {i}"), None);
        }
        assert!(m.len() <= 4);
        assert_eq!(m.counters().summarized_entries, 2);
        assert!(m.summary().contains("user: message 0"));
        assert!(m.summary().contains("user: message 1"));
        assert_eq!(m.entries()[0].content, "message 2");
    }

    #[test]
    fn test_memory_invariant_under_many_appends() {
        let mut m = store(6, 40, 2);
        let mut last_coverage = 0;
        for i in 0..100 {
            let content = "x".repeat((i * 7) % 60 + 1);
            m.record(MemoryRole::Agent, content, None);
            let c = m.counters();
            assert!(m.len() <= 6);
            assert!(c.retained_tokens <= 40);
            assert!(c.summarized_entries >= last_coverage);
            last_coverage = c.summarized_entries;
            assert_eq!(
                c.total_appended,
                m.len() as u64 + c.summarized_entries + c.dropped_entries
            );
        }
    }

    #[test]
    fn test_compact_is_idempotent() {
        let mut m = store(3, 1000, 2);
        for i in 0..3 {
            m.record(MemoryRole::User, format!("m{i}"), None);
        }
        let full = m.snapshot();
        m.compact();
        assert_eq!(m.snapshot(), full);
        m.compact();
        assert_eq!(m.snapshot(), full);
    }

    #[test]
    fn test_from_snapshot_at_exact_budget_is_unchanged() {
        let mut m = store(2, 1000, 1);
        m.record(MemoryRole::User, "What's 2+2?", None);
        m.record(MemoryRole::Agent, "4", None);
        let saved = m.snapshot();
        let restored = MemoryStore::from_snapshot(
            saved.clone(),
            m.config().clone(),
            Arc::new(TruncatingSummarizer::new(500)),
            clock(),
        );
        assert_eq!(restored.snapshot(), saved);
        assert!(restored.summary().is_empty());
    }

    #[test]
    fn test_oversized_entry_truncated_with_marker() {
        let mut m = store(10, 30, 2);
        m.record(MemoryRole::Tool, "y".repeat(1000), None);
        assert_eq!(m.len(), 1);
        assert!(m.entries()[0].content.ends_with("…[truncated]"));
        assert!(m.counters().retained_tokens <= 30);
    }

    #[test]
    fn test_summarizer_failure_drops_and_counts() {
        let mut m = MemoryStore::new(
            MemoryConfig {
                max_entries: 2,
                max_tokens: 1000,
                compact_batch: 1,
                recent_entries: 2,
            },
            Arc::new(FailingSummarizer),
            clock(),
        );
        for i in 0..4 {
            m.record(MemoryRole::User, format!("m{i}"), None);
        }
        assert_eq!(m.len(), 2);
        assert_eq!(m.counters().dropped_entries, 2);
        assert_eq!(m.counters().summarized_entries, 0);
        assert!(m.summary().is_empty());
    }

    #[test]
    fn test_from_snapshot_reapplies_budget() {
        let mut big = store(10, 1000, 2);
        for i in 0..8 {
            big.record(MemoryRole::User, format!("m{i}"), None);
        }
        let restored = MemoryStore::from_snapshot(
            big.snapshot(),
            MemoryConfig {
                max_entries: 4,
                max_tokens: 1000,
                compact_batch: 2,
                recent_entries: 2,
            },
            Arc::new(TruncatingSummarizer::new(500)),
            clock(),
        );
        assert_eq!(restored.len(), 4);
        assert_eq!(restored.counters().summarized_entries, 4);
        assert_eq!(restored.recent(1)[0].content, "m7");
    }
}
