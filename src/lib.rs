//! Helpdesk - 多智能体客服系统
//!
//! 模块划分：
//! - **agents**: 销售 / 技术支持 / 客户支持智能体与分派器（规则短路 + LLM 生成）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 对话记录存储（SQLite / 内存）与历史格式化
//! - **llm**: 生成与嵌入客户端抽象及实现（OpenAI 兼容 / DeepSeek / Mock / 哈希嵌入）、补全服务
//! - **observability**: tracing 日志初始化
//! - **policies**: 确定性业务规则谓词
//! - **retrieval**: 策略语料加载与向量检索
//! - **service**: 单轮对话编排与服务装配

pub mod agents;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod observability;
pub mod policies;
pub mod retrieval;
pub mod service;

pub use agents::{AgentKind, AgentReply, AgentRequest, DispatchError, Dispatcher, ReplyKind};
pub use service::{build_service, ServiceError, ServiceSettings, SupportService, TurnOutcome};
