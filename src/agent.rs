//! Agent 运行时
//!
//! 供 CLI 与 HTTP 入口共用：from_config 按配置装配凭证存储、Token 生命周期管理、工具注册表、
//! 分发器、LLM 与编排器；post_message 对单条用户输入跑一轮对话并总是返回文本。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::auth::{
    AppCredentials, AuthorizePage, IsolarCloudAuthClient, SqliteCredentialStore,
    TokenLifecycleManager,
};
use crate::config::AppConfig;
use crate::core::{
    ConversationOrchestrator, SessionRegistry, TurnEvent, TurnReply, TurnStatus, STORAGE_APOLOGY,
};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, OpenAiSettings};
use crate::tools::{
    IsolarCloudApi, ListSolarPlantsTool, PlantDetailsTool, SearchTool, SolarPlantsBasicInfoTool,
    ToolDispatcher, ToolError, ToolRegistry, WeatherTool,
};

const BUILTIN_SYSTEM_PROMPT: &str = "You are the solar energy assistant for Sungrow iSolarCloud users. \
Private plant data is only available through tools. To list plants call list_solar_plants. \
When the user names a plant, call list_solar_plants first and use its numeric ps_id; if no plant \
matches, reply \"I couldn't find a plant with that name in your account.\" Only with a numeric \
ps_id call solar_plants_basic_info or get_plant_details. Never guess ids and never use search_web \
for private data. Use get_weather_forecast when weather may explain production.";

/// 装配完成的 Agent：编排器 + Token 管理器 + 配置快照
pub struct Agent {
    orchestrator: ConversationOrchestrator,
    tokens: Arc<TokenLifecycleManager>,
    config: AppConfig,
}

impl Agent {
    pub fn new(
        orchestrator: ConversationOrchestrator,
        tokens: Arc<TokenLifecycleManager>,
        config: AppConfig,
    ) -> Self {
        Self {
            orchestrator,
            tokens,
            config,
        }
    }

    /// 按配置构建全部组件；events 用于前端实时展示工具调用
    pub async fn from_config(
        cfg: AppConfig,
        events: Option<mpsc::UnboundedSender<TurnEvent>>,
    ) -> anyhow::Result<Self> {
        let store = SqliteCredentialStore::open(&cfg.auth.database_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open credential store at {}",
                    cfg.auth.database_path.display()
                )
            })?;

        let auth_timeout = Duration::from_secs(cfg.auth.timeout_secs.max(1));
        let client = IsolarCloudAuthClient::new(
            cfg.auth.token_url.clone(),
            cfg.auth.refresh_url.clone(),
            auth_timeout,
        )
        .context("Failed to build authorization client")?;

        let app = AppCredentials::new(cfg.auth.resolved_app_key(), cfg.auth.resolved_app_secret());
        if !app.is_configured() {
            warn!("iSolarCloud app key/secret not configured; authorization and refresh will fail");
        }

        let mut manager = TokenLifecycleManager::new(Arc::new(store), Arc::new(client), app.clone())
            .with_expiry_skew(cfg.auth.expiry_skew_secs)
            .with_refresh_timeout(auth_timeout);
        if let Some(application_id) = cfg.auth.application_id.clone() {
            manager = manager.with_authorize_page(AuthorizePage {
                authorize_url: cfg.auth.authorize_url.clone(),
                cloud_id: cfg.auth.cloud_id.clone(),
                application_id,
            });
        }
        let tokens = Arc::new(manager);

        if cfg.tool_timeout_secs() != cfg.tools.tool_timeout_secs {
            warn!(
                configured = cfg.tools.tool_timeout_secs,
                effective = cfg.tool_timeout_secs(),
                "tools.tool_timeout_secs must exceed auth.timeout_secs, raised"
            );
        }
        let registry =
            build_tool_registry(&cfg, app).context("Failed to build tool registry")?;
        info!(tools = ?registry.tool_names(), "Tool registry ready");
        let dispatcher = Arc::new(ToolDispatcher::new(
            registry,
            Arc::clone(&tokens),
            cfg.tool_timeout_secs(),
            cfg.tools.max_concurrent,
        ));

        let llm = create_llm_from_config(&cfg);
        let sessions = Arc::new(SessionRegistry::new(cfg.app.default_session_id.clone()));
        // 客户端内部会重试，整体超时按重试次数放宽
        let model_timeout = Duration::from_secs(
            cfg.llm.timeouts.request.max(1) * (u64::from(cfg.llm.max_retries) + 1) + 5,
        );
        let mut orchestrator =
            ConversationOrchestrator::new(llm, dispatcher, sessions, load_system_prompt(&cfg))
                .with_max_tool_rounds(cfg.app.max_tool_rounds)
                .with_model_timeout(model_timeout);
        if let Some(tx) = events {
            orchestrator = orchestrator.with_event_sender(tx);
        }

        Ok(Self::new(orchestrator, tokens, cfg))
    }

    /// 处理一条用户消息，返回回复文本
    pub async fn post_message(&self, session_id: Option<&str>, text: &str) -> String {
        self.post_message_detailed(session_id, text).await.text
    }

    /// 同 post_message，附带结束状态与工具轮数
    pub async fn post_message_detailed(&self, session_id: Option<&str>, text: &str) -> TurnReply {
        let session_id = self.sessions().normalize_id(session_id);
        match self.orchestrator.run_turn(&session_id, text).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(session_id = %session_id, "Turn failed: {}", e);
                TurnReply {
                    text: STORAGE_APOLOGY.to_string(),
                    status: TurnStatus::Failed,
                    rounds: 0,
                }
            }
        }
    }

    pub async fn clear_session(&self, session_id: Option<&str>) -> bool {
        let session_id = self.sessions().normalize_id(session_id);
        self.sessions().clear(&session_id).await
    }

    pub fn tokens(&self) -> &Arc<TokenLifecycleManager> {
        &self.tokens
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        self.orchestrator.sessions()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 认证工具所用的 provider 名
    pub fn provider(&self) -> &str {
        &self.config.auth.provider
    }
}

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = if provider == "mock" {
        None
    } else {
        cfg.llm.api_key()
    };

    let Some(api_key) = api_key else {
        warn!("No model API key set or provider is mock, using Mock LLM");
        return Arc::new(MockLlmClient);
    };

    let settings = OpenAiSettings {
        base_url: cfg.llm.base_url.clone(),
        model: cfg.llm.model.clone(),
        temperature: cfg.llm.temperature,
        max_tokens: cfg.llm.max_tokens,
        max_retries: cfg.llm.max_retries,
        request_timeout: Duration::from_secs(cfg.llm.timeouts.request.max(1)),
    };
    match OpenAiClient::new(settings, api_key) {
        Ok(client) => {
            info!("Using OpenAI-compatible LLM ({} @ {})", cfg.llm.model, cfg.llm.base_url);
            Arc::new(client)
        }
        Err(e) => {
            warn!("Failed to build LLM client ({}), using Mock LLM", e);
            Arc::new(MockLlmClient)
        }
    }
}

/// 读取系统提示词：配置路径 → ../ 同名路径 → 内置
pub fn load_system_prompt(cfg: &AppConfig) -> String {
    let path = cfg.app.system_prompt_path.as_path();
    [path.to_path_buf(), Path::new("..").join(path)]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(&p).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| BUILTIN_SYSTEM_PROMPT.to_string())
}

/// 注册全部工具：iSolarCloud 三个认证工具挂在 auth.provider 下；天气总是可用；
/// 搜索仅在配置了 Tavily Key 时注册
pub fn build_tool_registry(cfg: &AppConfig, app: AppCredentials) -> Result<ToolRegistry, ToolError> {
    let timeout = Duration::from_secs(cfg.tool_timeout_secs());
    let provider = cfg.auth.provider.as_str();
    let api = IsolarCloudApi::new(cfg.tools.isolarcloud.api_base.clone(), app, timeout)?;

    let mut registry = ToolRegistry::new();
    registry.register_authenticated(provider, ListSolarPlantsTool::new(api.clone()));
    registry.register_authenticated(provider, SolarPlantsBasicInfoTool::new(api.clone()));
    registry.register_authenticated(provider, PlantDetailsTool::new(api));
    registry.register_public(WeatherTool::new(cfg.tools.weather.base_url.clone(), timeout)?);

    match cfg.tools.search.resolved_api_key() {
        Some(key) => registry.register_public(SearchTool::new(
            cfg.tools.search.base_url.clone(),
            key,
            cfg.tools.search.max_results,
            timeout,
        )?),
        None => info!("TAVILY_API_KEY not set, search_web disabled"),
    }
    Ok(registry)
}
