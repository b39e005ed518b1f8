//! 摘要器：将被压缩的最旧条目折叠进滚动摘要
//!
//! 默认实现是确定性的拼接截断（TruncatingSummarizer）；失败时 MemoryStore 退化为直接丢弃。

use crate::memory::MemoryEntry;

pub trait Summarizer: Send + Sync {
    /// 返回新的摘要（previous 为旧摘要）
    fn summarize(&self, previous: &str, batch: &[MemoryEntry]) -> Result<String, String>;
}

const ELLIPSIS: char = '…';

/// 拼接 `role: content` 行，超出 max_chars 时只保留最近的文本
#[derive(Debug, Clone)]
pub struct TruncatingSummarizer {
    max_chars: usize,
}

impl TruncatingSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(2),
        }
    }
}

impl Summarizer for TruncatingSummarizer {
    fn summarize(&self, previous: &str, batch: &[MemoryEntry]) -> Result<String, String> {
        let mut summary = previous.to_string();
        for entry in batch {
            if !summary.is_empty() {
                summary.push('\n');
            }
            summary.push_str(&format!("{}: {}", entry.role, entry.content));
        }

        let count = summary.chars().count();
        if count <= self.max_chars {
            return Ok(summary);
        }
        let keep = self.max_chars - 1;
        let tail: String = summary.chars().skip(count - keep).collect();
        Ok(format!("{ELLIPSIS}{tail}"))
    }
}
