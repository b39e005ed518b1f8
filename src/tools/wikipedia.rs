//! Wikipedia 工具：调用 REST summary 端点，返回标题、摘要与链接
//!
//! 超时与摘要长度由 [tools.wikipedia] 配置；页面不存在时返回正常结果（found = false），不视为失败。

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::WikipediaSection;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WikipediaInput {
    /// 条目标题或检索词
    pub query: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct WikipediaOutput {
    pub found: bool,
    pub title: String,
    pub summary: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    title: String,
    #[serde(default)]
    extract: String,
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrl>,
}

#[derive(Debug, Deserialize)]
struct PageUrl {
    page: String,
}

pub const DESCRIPTION: &str =
    "Search Wikipedia for a topic and return the article summary. Args: {\"query\": \"Rust (programming language)\"}";

#[derive(Debug, Clone)]
pub struct WikipediaTool {
    client: Client,
    base_url: String,
    max_chars: usize,
}

impl WikipediaTool {
    pub fn new(cfg: &WikipediaSection) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(concat!("hive/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            base_url: cfg.base_url.clone(),
            max_chars: cfg.max_chars,
        })
    }

    fn page_url(&self, title: &str) -> Result<Url, String> {
        let mut url = Url::parse(&self.base_url).map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|_| format!("invalid base url: {}", self.base_url))?
            .pop_if_empty()
            .push(&title.replace(' ', "_"));
        Ok(url)
    }

    pub async fn execute(&self, args: Value) -> Result<Value, String> {
        let input: WikipediaInput = serde_json::from_value(args).map_err(|e| e.to_string())?;
        let query = input.query.trim();
        if query.is_empty() {
            return Err("query must not be empty".to_string());
        }

        let url = self.page_url(query)?;
        tracing::debug!(url = %url, "wikipedia lookup");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Wikipedia search failed: {e}"))?;

        let output = if resp.status() == StatusCode::NOT_FOUND {
            WikipediaOutput {
                found: false,
                title: query.to_string(),
                summary: "No Wikipedia articles found for the query.".to_string(),
                url: None,
            }
        } else {
            let resp = resp
                .error_for_status()
                .map_err(|e| format!("Wikipedia search failed: {e}"))?;
            let body: SummaryResponse = resp
                .json()
                .await
                .map_err(|e| format!("Wikipedia search failed: {e}"))?;
            WikipediaOutput {
                found: true,
                summary: truncate_chars(&body.extract, self.max_chars),
                url: body.content_urls.and_then(|u| u.desktop).map(|d| d.page),
                title: body.title,
            }
        };
        serde_json::to_value(output).map_err(|e| e.to_string())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url_encodes_title() {
        let tool = WikipediaTool::new(&WikipediaSection::default()).unwrap();
        let url = tool.page_url("Rust (programming language)").unwrap();
        assert_eq!(
            url.as_str(),
            "https://en.wikipedia.org/api/rest_v1/page/summary/Rust_(programming_language)"
        );
        let url = tool.page_url("C/C++").unwrap();
        assert!(url.as_str().ends_with("/summary/C%2FC++"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
