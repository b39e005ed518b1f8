//! 网页搜索工具：向 DuckDuckGo HTML 端点提交查询，返回前 max_results 条（标题、链接、摘要）
//!
//! 不需要 API key；端点、地区、条数与超时由 [tools.web_search] 配置。

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::WebSearchSection;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchInput {
    /// 检索词
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct WebSearchOutput {
    pub query: String,
    pub results: Vec<SearchHit>,
}

pub const DESCRIPTION: &str =
    "Search the web for information about a topic and return the top results. Args: {\"query\": \"tokio runtime\"}";

#[derive(Debug, Clone)]
pub struct WebSearchTool {
    client: Client,
    base_url: String,
    region: String,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(cfg: &WebSearchSection) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            base_url: cfg.base_url.clone(),
            region: cfg.region.clone(),
            max_results: cfg.max_results.max(1),
        })
    }

    pub async fn execute(&self, args: Value) -> Result<Value, String> {
        let input: WebSearchInput = serde_json::from_value(args).map_err(|e| e.to_string())?;
        let query = input.query.trim();
        if query.is_empty() {
            return Err("query must not be empty".to_string());
        }

        debug!(query = %query, region = %self.region, "web search");
        let html = self
            .client
            .post(&self.base_url)
            .form(&[("q", query), ("kl", self.region.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("Web search failed: {e}"))?
            .text()
            .await
            .map_err(|e| format!("Web search failed: {e}"))?;

        if html.contains("anomaly-modal") {
            warn!("web search blocked by bot detection");
            return Err("Web search failed: search temporarily blocked".to_string());
        }

        let results = parse_results(&html, self.max_results);
        debug!(query = %query, found = results.len(), "web search done");
        serde_json::to_value(WebSearchOutput {
            query: query.to_string(),
            results,
        })
        .map_err(|e| e.to_string())
    }
}

static TITLE: OnceLock<Option<Regex>> = OnceLock::new();
static SNIPPET: OnceLock<Option<Regex>> = OnceLock::new();
static TAG: OnceLock<Option<Regex>> = OnceLock::new();

fn regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// 结果页中 `result__a` 是标题链接，`result__snippet` 是摘要，二者按出现顺序配对
fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let (Some(title_re), Some(snippet_re)) = (
        regex(&TITLE, r#"<a[^>]+class="result__a"[^>]+href="([^"]*)"[^>]*>(.*?)</a>"#),
        regex(&SNIPPET, r#"<a[^>]+class="result__snippet"[^>]*>(.*?)</a>"#),
    ) else {
        return Vec::new();
    };

    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .map(|cap| strip_tags(cap.get(1).map_or("", |m| m.as_str())))
        .collect();

    title_re
        .captures_iter(html)
        .enumerate()
        .map(|(i, cap)| SearchHit {
            title: strip_tags(cap.get(2).map_or("", |m| m.as_str())),
            url: real_url(cap.get(1).map_or("", |m| m.as_str())),
            snippet: snippets.get(i).cloned().unwrap_or_default(),
        })
        .filter(|hit| !hit.url.is_empty() && !hit.title.is_empty())
        .take(max_results)
        .collect()
}

/// 跳转链接 `//duckduckgo.com/l/?uddg=<encoded>&...` 还原为目标地址
fn real_url(raw: &str) -> String {
    let Some(pos) = raw.find("uddg=") else {
        return raw.to_string();
    };
    let rest = &raw[pos + 5..];
    let encoded = rest.split('&').next().unwrap_or(rest);
    urlencoding::decode(encoded)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| encoded.to_string())
}

fn strip_tags(s: &str) -> String {
    let text = match regex(&TAG, r"<[^>]+>") {
        Some(re) => re.replace_all(s, "").into_owned(),
        None => s.to_string(),
    };
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}
