//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__PLANNER__MAX_PLAN_RETRIES=3`）。
//! 所有阈值、重试次数与超时都是配置项，带文档化的默认值。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub memory: MemorySection,
    pub planner: PlannerSection,
    pub retrieval: RetrievalSection,
    pub tools: ToolsSection,
    pub persistence: PersistenceSection,
}

/// [app] 段：应用名、状态目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 文件 / SQLite 存储的根目录，未设置时用 ./state
    pub state_dir: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 需要 OPENAI_API_KEY，否则退回 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 嵌入模型（VectorIndex 使用）
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            embedding_model: default_embedding_model(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request_secs: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request_secs: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [memory] 段：短期记忆预算与压缩参数
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    /// 活跃条目上限
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// 活跃条目估算 token 上限
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// 每次压缩折叠的最旧条目数（K）
    #[serde(default = "default_compact_batch")]
    pub compact_batch: usize,
    /// 滚动摘要最大字符数
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    /// 拼入 prompt 的最近条目数
    #[serde(default = "default_recent_entries")]
    pub recent_entries: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_tokens: default_max_tokens(),
            compact_batch: default_compact_batch(),
            summary_max_chars: default_summary_max_chars(),
            recent_entries: default_recent_entries(),
        }
    }
}

fn default_max_entries() -> usize {
    40
}

fn default_max_tokens() -> usize {
    6000
}

fn default_compact_batch() -> usize {
    8
}

fn default_summary_max_chars() -> usize {
    4000
}

fn default_recent_entries() -> usize {
    12
}

/// [planner] 段：计划长度、重试与推理超时
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSection {
    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,
    /// InvalidPlan 时的重新提示次数，用尽后退回单步 respond
    #[serde(default = "default_max_plan_retries")]
    pub max_plan_retries: usize,
    /// 推理调用超时/失败后的重试次数
    #[serde(default = "default_capability_retries")]
    pub capability_retries: usize,
    /// 工具超时后的重试次数
    #[serde(default = "default_tool_retries")]
    pub tool_retries: usize,
    #[serde(default = "default_reasoning_timeout_secs")]
    pub reasoning_timeout_secs: u64,
    /// 规划与回复提示的估算 token 预算（人设、工具目录、摘要、近期历史按优先级分配）
    #[serde(default = "default_prompt_budget")]
    pub prompt_budget: usize,
    /// 所有计划都视为可恢复（每步写检查点）；计划本身也可声明 resumable
    #[serde(default)]
    pub checkpoint_plans: bool,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            max_plan_steps: default_max_plan_steps(),
            max_plan_retries: default_max_plan_retries(),
            capability_retries: default_capability_retries(),
            tool_retries: default_tool_retries(),
            reasoning_timeout_secs: default_reasoning_timeout_secs(),
            prompt_budget: default_prompt_budget(),
            checkpoint_plans: false,
        }
    }
}

fn default_prompt_budget() -> usize {
    6000
}

fn default_max_plan_steps() -> usize {
    8
}

fn default_max_plan_retries() -> usize {
    2
}

fn default_capability_retries() -> usize {
    2
}

fn default_tool_retries() -> usize {
    1
}

fn default_reasoning_timeout_secs() -> u64 {
    60
}

/// [retrieval] 段：后端、检索条数、超时与分块参数
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSection {
    /// keyword（本地分词重叠打分）/ vector（嵌入 + 余弦相似度）
    #[serde(default = "default_retrieval_backend")]
    pub backend: String,
    /// 启动时索引的文档目录
    pub documents_dir: Option<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            backend: default_retrieval_backend(),
            documents_dir: None,
            extensions: default_extensions(),
            default_k: default_k(),
            timeout_secs: default_retrieval_timeout_secs(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_retrieval_backend() -> String {
    "keyword".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string()]
}

fn default_k() -> usize {
    3
}

fn default_retrieval_timeout_secs() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

/// [tools] 段：工具超时与内置工具开关
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub wikipedia: WikipediaSection,
    #[serde(default)]
    pub web_search: WebSearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            wikipedia: WikipediaSection::default(),
            web_search: WebSearchSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.wikipedia] 段：默认关闭（需要外网）
#[derive(Debug, Clone, Deserialize)]
pub struct WikipediaSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_wikipedia_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_wikipedia_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_wikipedia_base_url")]
    pub base_url: String,
}

impl Default for WikipediaSection {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: default_wikipedia_timeout_secs(),
            max_chars: default_wikipedia_max_chars(),
            base_url: default_wikipedia_base_url(),
        }
    }
}

fn default_wikipedia_timeout_secs() -> u64 {
    15
}

fn default_wikipedia_max_chars() -> usize {
    500
}

fn default_wikipedia_base_url() -> String {
    "https://en.wikipedia.org/api/rest_v1/page/summary/".to_string()
}

/// [tools.web_search] 段：默认关闭（需要外网）
#[derive(Debug, Clone, Deserialize)]
pub struct WebSearchSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_web_search_timeout_secs")]
    pub timeout_secs: u64,
    /// 返回的结果条数
    #[serde(default = "default_web_search_max_results")]
    pub max_results: usize,
    #[serde(default = "default_web_search_region")]
    pub region: String,
    #[serde(default = "default_web_search_base_url")]
    pub base_url: String,
}

impl Default for WebSearchSection {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: default_web_search_timeout_secs(),
            max_results: default_web_search_max_results(),
            region: default_web_search_region(),
            base_url: default_web_search_base_url(),
        }
    }
}

fn default_web_search_timeout_secs() -> u64 {
    15
}

fn default_web_search_max_results() -> usize {
    3
}

fn default_web_search_region() -> String {
    "us-en".to_string()
}

fn default_web_search_base_url() -> String {
    "https://html.duckduckgo.com/html/".to_string()
}

/// [persistence] 段：状态存储后端
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceSection {
    /// memory / file / sqlite
    #[serde(default = "default_backend")]
    pub backend: String,
    /// file 后端为目录，sqlite 后端为数据库文件；未设置时落在 app.state_dir 下
    pub path: Option<PathBuf>,
    /// 每个会话保留的历史版本数，0 表示不保留
    #[serde(default = "default_keep_history")]
    pub keep_history: usize,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
            keep_history: default_keep_history(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_keep_history() -> usize {
    10
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    // 显式指定的文件必须存在且可解析
    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
