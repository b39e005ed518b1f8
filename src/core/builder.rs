//! Agent 构建器：统一的组件初始化逻辑
//!
//! 按配置组装 LLM、检索后端、工具注册表、状态存储与 Planner，得到 Orchestrator。
//! 每个外部能力都可以用 with_* 替换（测试中注入 ScriptedLlmClient、ManualClock、内存存储）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{load_config, AppConfig};
use crate::core::orchestrator::{Orchestrator, OrchestratorParts};
use crate::core::{AgentError, Clock, SystemClock};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, OpenAiEmbedder};
use crate::memory::{MemoryConfig, Summarizer, TruncatingSummarizer};
use crate::react::{PlanEvent, Planner};
use crate::retrieval::{ChunkingConfig, ContextRetriever, KeywordIndex, SearchBackend, VectorIndex};
use crate::store::{BlobStore, FileBlobStore, InMemoryBlobStore, SqliteBlobStore, StateSerializer};
use crate::tools::{ToolInvoker, ToolRegistry, ToolSpec};

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    match (provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            info!("Using OpenAI LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&key),
                Duration::from_secs(cfg.llm.timeouts.request_secs.max(1)),
            ))
        }
        ("mock", _) => Arc::new(MockLlmClient),
        _ => {
            warn!("No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// Agent 构建器
pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    search_backend: Option<Arc<dyn SearchBackend>>,
    blob_store: Option<Arc<dyn BlobStore>>,
    clock: Option<Arc<dyn Clock>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    custom_tools: Vec<ToolSpec>,
    event_tx: Option<mpsc::UnboundedSender<PlanEvent>>,
    tool_timeout: Option<Duration>,
    reasoning_timeout: Option<Duration>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            search_backend: None,
            blob_store: None,
            clock: None,
            summarizer: None,
            custom_tools: Vec::new(),
            event_tx: None,
            tool_timeout: None,
            reasoning_timeout: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_search_backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.search_backend = Some(backend);
        self
    }

    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// 追加自定义工具（与内置工具同名时 build 返回 DuplicateTool）
    pub fn with_tool(mut self, spec: ToolSpec) -> Self {
        self.custom_tools.push(spec);
        self
    }

    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<PlanEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 覆盖配置中的工具超时（秒级配置不够细时使用）
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn with_reasoning_timeout(mut self, timeout: Duration) -> Self {
        self.reasoning_timeout = Some(timeout);
        self
    }

    /// 内置工具（calculator / echo / clock，wikipedia 与 web_search 按配置启用）+ 自定义工具
    pub fn build_tool_registry(&self, clock: Arc<dyn Clock>, custom: Vec<ToolSpec>) -> Result<ToolRegistry, AgentError> {
        let mut tools = ToolRegistry::new();
        tools.register(ToolSpec::calculator())?;
        tools.register(ToolSpec::echo())?;
        tools.register(ToolSpec::clock(clock))?;
        if self.config.tools.wikipedia.enabled {
            tools.register(ToolSpec::wikipedia(&self.config.tools.wikipedia)?)?;
        }
        if self.config.tools.web_search.enabled {
            tools.register(ToolSpec::web_search(&self.config.tools.web_search)?)?;
        }
        for spec in custom {
            tools.register(spec)?;
        }
        Ok(tools)
    }

    /// 按 [retrieval] 配置构建检索后端，并索引 documents_dir
    pub async fn build_search_backend(&self) -> Result<Arc<dyn SearchBackend>, AgentError> {
        let cfg = &self.config.retrieval;
        let extensions: Vec<&str> = cfg.extensions.iter().map(String::as_str).collect();
        match cfg.backend.to_lowercase().as_str() {
            "keyword" => {
                let index = KeywordIndex::new(ChunkingConfig::from(cfg));
                if let Some(dir) = &cfg.documents_dir {
                    if let Err(e) = index.index_directory(dir, &extensions) {
                        warn!(dir = %dir.display(), error = %e, "failed to index documents");
                    }
                }
                Ok(Arc::new(index))
            }
            "vector" => {
                let embedder = OpenAiEmbedder::new(
                    self.config.llm.base_url.as_deref(),
                    &self.config.llm.embedding_model,
                    None,
                    Duration::from_secs(self.config.llm.timeouts.request_secs.max(1)),
                );
                let index = VectorIndex::new(Arc::new(embedder), ChunkingConfig::from(cfg));
                if let Some(dir) = &cfg.documents_dir {
                    if let Err(e) = index.index_directory(dir, &extensions).await {
                        warn!(dir = %dir.display(), error = %e, "failed to index documents");
                    }
                }
                Ok(Arc::new(index))
            }
            other => Err(AgentError::Config(format!("unknown retrieval backend `{other}`"))),
        }
    }

    /// 按 [persistence] 配置构建状态存储
    pub async fn build_blob_store(&self) -> Result<Arc<dyn BlobStore>, AgentError> {
        let cfg = &self.config.persistence;
        let state_dir = self
            .config
            .app
            .state_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("state"));
        let to_config = |e: crate::store::BlobError| AgentError::Config(format!("state store: {e}"));
        match cfg.backend.to_lowercase().as_str() {
            "memory" => Ok(Arc::new(InMemoryBlobStore::new())),
            "file" => {
                let dir = cfg.path.clone().unwrap_or_else(|| state_dir.join("states"));
                info!(dir = %dir.display(), "Using file state store");
                Ok(Arc::new(FileBlobStore::open(dir).await.map_err(to_config)?))
            }
            "sqlite" => {
                let path = cfg.path.clone().unwrap_or_else(|| state_dir.join("hive.db"));
                info!(path = %path.display(), "Using SQLite state store");
                Ok(Arc::new(SqliteBlobStore::open(path).map_err(to_config)?))
            }
            other => Err(AgentError::Config(format!("unknown persistence backend `{other}`"))),
        }
    }

    /// 组装 Orchestrator
    pub async fn build(mut self) -> Result<Orchestrator, AgentError> {
        let clock: Arc<dyn Clock> = self.clock.clone().unwrap_or_else(|| Arc::new(SystemClock));
        let custom = std::mem::take(&mut self.custom_tools);
        let registry = self.build_tool_registry(clock.clone(), custom)?;
        let llm = match self.llm.clone() {
            Some(llm) => llm,
            None => create_llm_from_config(&self.config),
        };
        let backend = match self.search_backend.clone() {
            Some(backend) => backend,
            None => self.build_search_backend().await?,
        };
        let store = match self.blob_store.clone() {
            Some(store) => store,
            None => self.build_blob_store().await?,
        };
        let summarizer = self
            .summarizer
            .clone()
            .unwrap_or_else(|| Arc::new(TruncatingSummarizer::new(self.config.memory.summary_max_chars)));

        let mut planner = Planner::new(llm, &self.config.planner).with_recent_entries(self.config.memory.recent_entries);
        if let Some(timeout) = self.reasoning_timeout {
            planner = planner.with_reasoning_timeout(timeout);
        }
        let tool_timeout = self
            .tool_timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.tools.tool_timeout_secs.max(1)));
        info!(tools = ?registry.names(), "agent components ready");

        Ok(Orchestrator::new(OrchestratorParts {
            planner,
            invoker: ToolInvoker::new(Arc::new(registry), tool_timeout),
            retriever: ContextRetriever::from_config(backend, &self.config.retrieval),
            serializer: StateSerializer::new(store, self.config.persistence.keep_history),
            summarizer,
            clock,
            memory_config: MemoryConfig::from(&self.config.memory),
            checkpoint_plans: self.config.planner.checkpoint_plans,
            event_tx: self.event_tx.take(),
        }))
    }
}

/// 从配置文件创建 Orchestrator
///
/// 显式传入的配置文件缺失或无法解析时返回错误；未指定路径时，默认配置文件加载失败则退回内置默认值。
pub async fn create_orchestrator(config_path: Option<PathBuf>) -> anyhow::Result<Orchestrator> {
    let cfg = match config_path {
        Some(path) => load_config(Some(path.clone()))
            .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))?,
        None => load_config(None).unwrap_or_else(|e| {
            warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        }),
    };
    Ok(AgentBuilder::new(cfg).build().await?)
}
