//! Token 估算与提示预算
//!
//! 记忆预算与规划提示共用同一估算器；提示各段按优先级竞争预算，超出部分截断。

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 英文约 4 字符/token，中文约 1.5 字符/token，至少为 1
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;
        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }
        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }
}

pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// 截断到不超过 max_tokens（含标记），保留开头
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if TokenEstimator::estimate(text) <= max_tokens {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    // 二分找最长的前缀，使 前缀 + 标记 不超过预算
    let (mut lo, mut hi) = (0usize, chars.len());
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        let candidate: String = chars[..mid].iter().collect();
        if TokenEstimator::estimate(&format!("{candidate}{TRUNCATION_MARKER}")) <= max_tokens {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    if lo == 0 && TokenEstimator::estimate(TRUNCATION_MARKER) > max_tokens {
        return "…".to_string();
    }
    let prefix: String = chars[..lo].iter().collect();
    format!("{}{}", prefix.trim_end(), TRUNCATION_MARKER)
}

/// 规划提示中的段落（数字越小优先级越高）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptSegment {
    Persona,
    PlanFormat,
    ToolCatalog,
    Summary,
    RecentHistory,
    Context,
    StepResults,
}

impl PromptSegment {
    pub fn priority(&self) -> u8 {
        match self {
            PromptSegment::Persona => 0,
            PromptSegment::PlanFormat => 1,
            PromptSegment::ToolCatalog => 2,
            PromptSegment::StepResults => 3,
            PromptSegment::RecentHistory => 4,
            PromptSegment::Context => 5,
            PromptSegment::Summary => 6,
        }
    }
}

/// Token 预算管理器
#[derive(Debug, Clone)]
pub struct TokenBudget {
    total_budget: usize,
}

impl TokenBudget {
    pub fn new(total_budget: usize) -> Self {
        Self { total_budget }
    }

    pub fn total_budget(&self) -> usize {
        self.total_budget
    }

    /// 按优先级分配预算；输出保持输入顺序，空段与无预算段被丢弃
    pub fn allocate(&self, segments: &[(PromptSegment, String)]) -> Vec<(PromptSegment, String)> {
        let mut order: Vec<usize> = (0..segments.len()).collect();
        order.sort_by_key(|&i| segments[i].0.priority());

        let mut remaining = self.total_budget;
        let mut allowed: Vec<Option<String>> = vec![None; segments.len()];
        for i in order {
            let (_, content) = &segments[i];
            if content.is_empty() || remaining == 0 {
                continue;
            }
            let estimated = TokenEstimator::estimate(content);
            if estimated <= remaining {
                allowed[i] = Some(content.clone());
                remaining -= estimated;
            } else {
                let truncated = truncate_to_tokens(content, remaining);
                remaining = remaining.saturating_sub(TokenEstimator::estimate(&truncated));
                allowed[i] = Some(truncated);
            }
        }

        segments
            .iter()
            .zip(allowed)
            .filter_map(|((seg, _), content)| content.map(|c| (*seg, c)))
            .collect()
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(8000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimator() {
        assert_eq!(TokenEstimator::estimate("Hello World!"), 3);
        assert_eq!(TokenEstimator::estimate(""), 1);
        assert!(TokenEstimator::estimate("你好世界") >= 2);
    }

    #[test]
    fn test_truncate_fits_budget() {
        let text = "word ".repeat(200);
        let out = truncate_to_tokens(&text, 20);
        assert!(TokenEstimator::estimate(&out) <= 20);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(truncate_to_tokens("short", 20), "short");
    }

    #[test]
    fn test_budget_allocation_prefers_persona() {
        let budget = TokenBudget::new(60);
        let segments = vec![
            (PromptSegment::Summary, "old summary ".repeat(40)),
            (PromptSegment::Persona, "You are Ada.".to_string()),
        ];
        let result = budget.allocate(&segments);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].0, PromptSegment::Summary);
        assert!(result[0].1.ends_with(TRUNCATION_MARKER));
        assert_eq!(result[1].1, "You are Ada.");
    }
}
