//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SOLAR__*` 覆盖（双下划线表示嵌套，如 `SOLAR__LLM__MODEL=llama3`）。
//! 密钥类字段另有约定俗成的环境变量兜底（SUNGROW_APP_KEY / SUNGROW_APP_SECRET / TAVILY_API_KEY）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub auth: AuthSection,
    pub tools: ToolsSection,
    pub web: WebSection,
}

impl AppConfig {
    /// 生效的工具超时（秒）：严格大于 auth.timeout_secs
    pub fn tool_timeout_secs(&self) -> u64 {
        let floor = self.auth.timeout_secs.max(1) + 1;
        self.tools.tool_timeout_secs.max(floor)
    }
}

/// [app] 段：应用名、系统提示词、会话默认值、单轮工具轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 系统提示词文件；不存在时使用内置提示词
    pub system_prompt_path: PathBuf,
    pub default_session_id: String,
    pub max_tool_rounds: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "solar-assistant".to_string(),
            system_prompt_path: PathBuf::from("config/prompts/system.txt"),
            default_session_id: "default".to_string(),
            max_tool_rounds: 8,
        }
    }
}

/// [llm] 段：OpenAI 兼容端点（默认 Groq）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai（兼容协议）/ mock
    pub provider: String,
    pub model: String,
    pub base_url: String,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "openai/gpt-oss-120b".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.0,
            max_tokens: 1024,
            max_retries: 2,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

impl LlmSection {
    /// 依次读取 api_key_env、OPENAI_API_KEY
    pub fn api_key(&self) -> Option<String> {
        [self.api_key_env.as_str(), "OPENAI_API_KEY"]
            .iter()
            .filter(|name| !name.is_empty())
            .find_map(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次模型请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [auth] 段：iSolarCloud OAuth
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub provider: String,
    pub database_path: PathBuf,
    pub app_key: Option<String>,
    pub app_secret: Option<String>,
    pub token_url: String,
    pub refresh_url: String,
    pub authorize_url: String,
    pub application_id: Option<String>,
    pub cloud_id: String,
    pub redirect_uri: String,
    /// 授权服务器请求超时（秒）
    pub timeout_secs: u64,
    /// 提前判定过期的秒数
    pub expiry_skew_secs: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            provider: "isolarcloud".to_string(),
            database_path: PathBuf::from("data/tokens.db"),
            app_key: None,
            app_secret: None,
            token_url: "https://gateway.isolarcloud.com.hk/openapi/apiManage/token".to_string(),
            refresh_url: "https://gateway.isolarcloud.com.hk/openapi/apiManage/refreshToken"
                .to_string(),
            authorize_url: "https://web3.isolarcloud.com.hk/#/authorized-app".to_string(),
            application_id: None,
            cloud_id: "2".to_string(),
            redirect_uri: "http://localhost:3000/callback".to_string(),
            timeout_secs: 30,
            expiry_skew_secs: 30,
        }
    }
}

impl AuthSection {
    pub fn resolved_app_key(&self) -> String {
        non_empty(self.app_key.clone())
            .or_else(|| env_non_empty("SUNGROW_APP_KEY"))
            .unwrap_or_default()
    }

    pub fn resolved_app_secret(&self) -> String {
        non_empty(self.app_secret.clone())
            .or_else(|| env_non_empty("SUNGROW_APP_SECRET"))
            .unwrap_or_default()
    }
}

/// [tools] 段：超时、并发与各工具端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），含取 token 的时间；实际取值见 AppConfig::tool_timeout_secs
    pub tool_timeout_secs: u64,
    /// 同一批工具调用的并发上限
    pub max_concurrent: usize,
    pub isolarcloud: IsolarCloudSection,
    pub weather: WeatherSection,
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 45,
            max_concurrent: 3,
            isolarcloud: IsolarCloudSection::default(),
            weather: WeatherSection::default(),
            search: SearchSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IsolarCloudSection {
    pub api_base: String,
}

impl Default for IsolarCloudSection {
    fn default() -> Self {
        Self {
            api_base: "https://gateway.isolarcloud.com.hk".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherSection {
    pub base_url: String,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.open-meteo.com/v1/forecast".to_string(),
        }
    }
}

/// [tools.search] 段：Tavily
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_results: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.tavily.com/search".to_string(),
            api_key: None,
            max_results: 5,
        }
    }
}

impl SearchSection {
    pub fn resolved_api_key(&self) -> Option<String> {
        non_empty(self.api_key.clone()).or_else(|| env_non_empty("TAVILY_API_KEY"))
    }
}

/// [web] 段：HTTP 入口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub bind: String,
    /// /chat 未给 session_id 时使用
    pub default_session_id: String,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            default_session_id: "user1".to_string(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn env_non_empty(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

/// 从 config 目录加载配置，环境变量 SOLAR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SOLAR__*（双下划线表示嵌套键）
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

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SOLAR")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
