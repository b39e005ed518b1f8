//! 分词：中英文混合
//!
//! 含 CJK 字符时使用 jieba-rs 搜索引擎模式分词，否则按 Unicode 单词切分；统一转小写，去掉单字符的非 CJK 词。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;
use regex::Regex;

static JIEBA: OnceLock<Jieba> = OnceLock::new();
static WORD: OnceLock<Option<Regex>> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn word_regex() -> Option<&'static Regex> {
    WORD.get_or_init(|| Regex::new(r"[\p{L}\p{N}_]+").ok()).as_ref()
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{309F}'
        | '\u{30A0}'..='\u{30FF}'
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn keep(token: &str) -> bool {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => is_cjk(c),
        (Some(_), Some(_)) => token.chars().any(|c| c.is_alphanumeric()),
        _ => false,
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if contains_cjk(text) {
        jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| keep(s))
            .collect()
    } else {
        match word_regex() {
            Some(re) => re
                .find_iter(text)
                .map(|m| m.as_str().to_lowercase())
                .filter(|s| keep(s))
                .collect(),
            None => text
                .split_whitespace()
                .map(str::to_lowercase)
                .filter(|s| keep(s))
                .collect(),
        }
    }
}

pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_strips_punctuation() {
        assert_eq!(
            tokenize("Rust's borrow-checker, explained!"),
            vec!["rust", "borrow", "checker", "explained"]
        );
    }

    #[test]
    fn test_chinese_uses_jieba() {
        let tokens = tokenize_to_set("我喜欢学习编程");
        assert!(tokens.contains("编程"));
        assert!(tokens.contains("学习"));
    }

    #[test]
    fn test_empty() {
        assert!(tokenize("   ").is_empty());
    }
}
