//! 智能体分派
//!
//! 三类智能体（sales / tech_support / customer_support）共享同一流程：
//! 空输入 -> 澄清语；事实抽取 -> 规则短路拒绝；否则携带策略上下文与对话历史调用补全服务。
//! 规则拒绝从不调用生成后端。

pub mod customer_support;
pub mod extract;
pub mod sales;
pub mod tech_support;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::llm::CompletionProvider;

pub use customer_support::{CustomerSupportFacts, KeywordCustomerSupportExtractor};
pub use extract::FactExtractor;
pub use sales::{KeywordSalesExtractor, SalesFacts};
pub use tech_support::{KeywordTechSupportExtractor, TechSupportFacts};

/// 未提供策略上下文时的占位
pub const NO_POLICY_CONTEXT: &str = "No specific policies applied.";
/// 未提供对话历史时的占位
pub const NO_HISTORY: &str = "No previous messages.";

const REJECTION_PREFIX: &str = "❌ ";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown agent type: {given}. Valid types: {}", AgentKind::valid_names())]
    UnknownAgentType { given: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Sales,
    TechSupport,
    CustomerSupport,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::Sales, AgentKind::TechSupport, AgentKind::CustomerSupport];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Sales => "sales",
            AgentKind::TechSupport => "tech_support",
            AgentKind::CustomerSupport => "customer_support",
        }
    }

    fn valid_names() -> String {
        Self::ALL.iter().map(AgentKind::as_str).collect::<Vec<_>>().join(", ")
    }

    /// 空输入时的澄清语
    pub fn clarification(&self) -> &'static str {
        match self {
            AgentKind::Sales => sales::CLARIFICATION,
            AgentKind::TechSupport => tech_support::CLARIFICATION,
            AgentKind::CustomerSupport => customer_support::CLARIFICATION,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 小写、空格转下划线后匹配
impl FromStr for AgentKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(' ', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| DispatchError::UnknownAgentType {
                given: s.to_string(),
            })
    }
}

/// 单轮请求
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub user_text: String,
    pub policy_context: Option<String>,
    pub history_context: Option<String>,
}

impl AgentRequest {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            ..Self::default()
        }
    }

    pub fn with_policy_context(mut self, context: impl Into<String>) -> Self {
        self.policy_context = Some(context.into());
        self
    }

    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.history_context = Some(history.into());
        self
    }

    /// 生成时使用的上下文：策略上下文 + 对话历史
    fn generation_context(&self) -> String {
        let policy = non_blank(&self.policy_context).unwrap_or(NO_POLICY_CONTEXT);
        let history = non_blank(&self.history_context).unwrap_or(NO_HISTORY);
        format!("{}\n\nConversation History:\n{}", policy, history)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// 规则拒绝：规则名 + 带 ❌ 前缀的固定文案
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub rule: &'static str,
    pub message: String,
}

impl Rejection {
    pub fn new(rule: &'static str, message: impl AsRef<str>) -> Self {
        Self {
            rule,
            message: format!("{}{}", REJECTION_PREFIX, message.as_ref()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyKind {
    Clarification,
    PolicyRejection { rule: &'static str },
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentReply {
    pub agent: AgentKind,
    pub response: String,
    pub kind: ReplyKind,
}

/// 分派器：持有补全服务与各智能体的事实抽取器，无每请求可变状态
pub struct Dispatcher {
    completion: Arc<CompletionProvider>,
    sales: Arc<dyn FactExtractor<Facts = SalesFacts>>,
    tech_support: Arc<dyn FactExtractor<Facts = TechSupportFacts>>,
    customer_support: Arc<dyn FactExtractor<Facts = CustomerSupportFacts>>,
}

impl Dispatcher {
    pub fn new(completion: Arc<CompletionProvider>) -> Self {
        Self {
            completion,
            sales: Arc::new(KeywordSalesExtractor::default()),
            tech_support: Arc::new(KeywordTechSupportExtractor::new()),
            customer_support: Arc::new(KeywordCustomerSupportExtractor::default()),
        }
    }

    pub fn with_sales_extractor(mut self, extractor: Arc<dyn FactExtractor<Facts = SalesFacts>>) -> Self {
        self.sales = extractor;
        self
    }

    pub fn with_tech_support_extractor(
        mut self,
        extractor: Arc<dyn FactExtractor<Facts = TechSupportFacts>>,
    ) -> Self {
        self.tech_support = extractor;
        self
    }

    pub fn with_customer_support_extractor(
        mut self,
        extractor: Arc<dyn FactExtractor<Facts = CustomerSupportFacts>>,
    ) -> Self {
        self.customer_support = extractor;
        self
    }

    /// 按字符串类型分派；未知类型在任何生成之前返回错误
    pub async fn dispatch(&self, agent_type: &str, request: &AgentRequest) -> Result<AgentReply, DispatchError> {
        let kind: AgentKind = agent_type.parse()?;
        Ok(self.dispatch_kind(kind, request).await)
    }

    pub async fn dispatch_kind(&self, kind: AgentKind, request: &AgentRequest) -> AgentReply {
        let text = request.user_text.trim();
        if text.is_empty() {
            tracing::debug!(agent = %kind, "empty input, asking for clarification");
            return AgentReply {
                agent: kind,
                response: kind.clarification().to_string(),
                kind: ReplyKind::Clarification,
            };
        }

        if let Some(rejection) = self.check_rules(kind, text) {
            tracing::info!(agent = %kind, rule = rejection.rule, "request rejected by policy rule");
            return AgentReply {
                agent: kind,
                response: rejection.message,
                kind: ReplyKind::PolicyRejection { rule: rejection.rule },
            };
        }

        let context = request.generation_context();
        let response = self
            .completion
            .generate(kind.as_str(), &request.user_text, &context, self.completion.default_options())
            .await;
        AgentReply {
            agent: kind,
            response,
            kind: ReplyKind::Generated,
        }
    }

    fn check_rules(&self, kind: AgentKind, text: &str) -> Option<Rejection> {
        match kind {
            AgentKind::Sales => sales::evaluate(&self.sales.extract(text)),
            AgentKind::TechSupport => tech_support::evaluate(&self.tech_support.extract(text)),
            AgentKind::CustomerSupport => customer_support::evaluate(&self.customer_support.extract(text)),
        }
    }
}
