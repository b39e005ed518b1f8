//! 文档分块：按字符数切分并在分隔符处断开，相邻块保留重叠（UTF-8 安全）

use crate::config::RetrievalSection;

/// 文档块
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// `{source}#{index}`
    pub id: String,
    pub text: String,
    pub source: String,
    /// 在原文中的字符偏移
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// 分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&RetrievalSection::default())
    }
}

impl From<&RetrievalSection> for ChunkingConfig {
    fn from(cfg: &RetrievalSection) -> Self {
        let chunk_size = cfg.chunk_size.max(1);
        Self {
            chunk_size,
            // 重叠必须小于块大小，否则无法前进
            chunk_overlap: cfg.chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: ["\n\n", "\n", "。", ". ", "！", "？", "! ", "? ", " "]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, source: &str, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let target_end = (start + self.config.chunk_size).min(total);
            let end = if target_end < total {
                self.break_point(&chars[start..target_end])
                    .map(|len| start + len)
                    .unwrap_or(target_end)
            } else {
                target_end
            };

            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(Chunk {
                    id: format!("{}#{}", source, chunks.len()),
                    text: trimmed.to_string(),
                    source: source.to_string(),
                    offset: start,
                });
            }
            if end >= total {
                break;
            }

            let overlap = self.config.chunk_overlap.min(end - start);
            let next = end - overlap;
            start = if next > start { next } else { end };
        }

        chunks
    }

    /// 窗口内最后一个高优先级分隔符之后的位置（字符数）
    fn break_point(&self, window: &[char]) -> Option<usize> {
        let slice: String = window.iter().collect();
        for sep in &self.config.separators {
            if let Some(pos) = slice.rfind(sep.as_str()) {
                let len = slice[..pos].chars().count() + sep.chars().count();
                // 只在块的后半段断开，避免产生过碎的块
                if len > window.len() / 2 {
                    return Some(len);
                }
            }
        }
        None
    }
}
