//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HELPDESK__*` 覆盖（双下划线表示嵌套，如 `HELPDESK__RETRIEVAL__TOP_K=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub retrieval: RetrievalSection,
    pub conversation: ConversationSection,
    pub web: WebSection,
}

/// [app] 段：数据目录（SQLite 文件所在位置）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 未设置时用 ./data
    pub data_dir: Option<PathBuf>,
}

impl AppSection {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }
}

/// [llm] 段：后端选择、默认模型与温度
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek；最终由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmModelOverride,
    #[serde(default)]
    pub openai: LlmModelOverride,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            base_url: None,
            deepseek: LlmModelOverride::default(),
            openai: LlmModelOverride::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_temperature() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelOverride {
    pub model: Option<String>,
}

/// [embedding] 段：openai 或 hash（离线）
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 仅 hash 提供方使用
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: None,
            dimensions: default_dimensions(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_dimensions() -> usize {
    256
}

/// [retrieval] 段：策略语料目录、top-k 与相似度阈值
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSection {
    #[serde(default = "default_policy_dir")]
    pub policy_dir: PathBuf,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            policy_dir: default_policy_dir(),
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_policy_dir() -> PathBuf {
    PathBuf::from("policies")
}

fn default_top_k() -> usize {
    3
}

fn default_similarity_threshold() -> f32 {
    0.8
}

/// [conversation] 段：历史条数与查询上限
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationSection {
    /// 每轮带入上下文的最近消息条数
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// 首页展示的最近会话数
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    /// 按发送者过滤时的返回上限
    #[serde(default = "default_filter_limit")]
    pub filter_limit: usize,
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            recent_limit: default_recent_limit(),
            filter_limit: default_filter_limit(),
        }
    }
}

fn default_history_turns() -> usize {
    5
}

fn default_recent_limit() -> usize {
    5
}

fn default_filter_limit() -> usize {
    10
}

/// [web] 段
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

/// 从 config 目录加载配置，环境变量 HELPDESK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HELPDESK__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("HELPDESK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
