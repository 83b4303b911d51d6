//! 补全服务：按角色选取指令模板，拼接策略上下文后发起一次生成
//!
//! 后端失败时返回固定兜底文案，不向上传播、不重试。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::llm::{GenerationOptions, LlmClient, LlmError, Message};

/// 生成失败时的兜底回复
pub const GENERATION_FALLBACK: &str = "⚠️ Error: Unable to generate a response at the moment.";

/// 未知角色使用的通用模板
pub const GENERIC_TEMPLATE: &str =
    "You are an AI assistant. Provide helpful and professional responses.";

const CUSTOMER_SUPPORT_TEMPLATE: &str = r#"You are a highly professional and patient customer support representative.
- Always be polite, even in difficult situations.
- Use clear, empathetic, and solution-oriented language.
- Never use toxic words or offensive language.
- Follow company policies precisely and enforce them tactfully.
- Provide assistance efficiently while ensuring customer satisfaction.
- If answering a question that requires reasoning, first think step by step before providing a response.

**Examples:**
User: "I want a refund for a product I bought last week."
Agent: "I understand your concern. According to our policy, refunds are available within 14 days of purchase. Can you provide your order number so I can assist further?"

User: "My order never arrived."
Agent: "I'm sorry to hear that! Let me check the tracking details. Can you please share your order ID?""#;

const SALES_TEMPLATE: &str = r#"You are a knowledgeable and persuasive sales representative.
- Always be courteous and professional, using please, thank you, and you're welcome when applicable.
- Recommend products based on user inquiries while respecting company policies.
- Politely inform customers if a product is unavailable.
- Never promise unavailable discounts or products.
- Focus on customer needs while maintaining an engaging tone.
- If discussing pricing, comparisons, or calculations, first explain the steps logically before giving the final answer.

**Examples:**
User: "Do you have a discount on the Premium Plan?"
Agent: "Currently, we have a 10% discount for annual subscriptions. Would you like me to calculate the final price for you?"

User: "If I buy 3 Premium Plans with a 10% discount each, how much do I save?"
Agent: "Let's break it down: The standard price per plan is $100. With a 10% discount, each plan costs $90. You save $10 per plan, meaning for 3 plans, you save $30 in total.""#;

const TECH_SUPPORT_TEMPLATE: &str = r#"You are a skilled and patient technical support agent.
- Always respond professionally and with patience.
- Guide customers through troubleshooting steps in a structured manner.
- Ensure authentication is met before processing sensitive requests.
- Avoid technical jargon unless necessary; use easy-to-understand explanations.
- Do not disclose confidential information or perform unauthorized actions.
- If solving technical problems, first outline possible causes, evaluate them, and then provide a clear recommendation.

**Examples:**
User: "My internet is very slow."
Agent: "I understand the frustration. Let's check a few things: 1) Are other devices also slow? 2) Have you tried restarting your router? 3) Do you experience slow speeds at specific times of the day?"

User: "I can't reset my password."
Agent: "I can help! Are you seeing an error message? Also, make sure you're using the correct email linked to your account.""#;

/// 角色指令模板表：agent_type -> 模板
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<String, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        let templates = [
            ("customer_support", CUSTOMER_SUPPORT_TEMPLATE),
            ("sales", SALES_TEMPLATE),
            ("tech_support", TECH_SUPPORT_TEMPLATE),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { templates }
    }
}

impl PromptTemplates {
    /// 内置模板，再用 `<dir>/<agent_type>.md` 覆盖（文件存在且非空时）
    pub fn with_overrides_from(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        for (agent_type, template) in self.templates.iter_mut() {
            let path = dir.join(format!("{}.md", agent_type));
            if let Ok(text) = std::fs::read_to_string(&path) {
                if !text.trim().is_empty() {
                    tracing::info!("prompt override loaded: {}", path.display());
                    *template = text.trim().to_string();
                }
            }
        }
        self
    }

    /// 从 config/prompts 或 ../config/prompts 加载覆盖
    pub fn from_default_dirs() -> Self {
        ["config/prompts", "../config/prompts"]
            .into_iter()
            .find(|p| Path::new(p).is_dir())
            .map(|dir| Self::default().with_overrides_from(dir))
            .unwrap_or_default()
    }

    /// 按角色取模板；未知角色回落到通用模板
    pub fn template_for(&self, agent_type: &str) -> &str {
        self.templates
            .get(agent_type)
            .map(String::as_str)
            .unwrap_or(GENERIC_TEMPLATE)
    }
}

/// 补全服务：持有生成后端与模板表，进程启动时构建一次并共享
pub struct CompletionProvider {
    llm: Arc<dyn LlmClient>,
    templates: PromptTemplates,
    defaults: GenerationOptions,
}

impl CompletionProvider {
    pub fn new(llm: Arc<dyn LlmClient>, templates: PromptTemplates, defaults: GenerationOptions) -> Self {
        Self {
            llm,
            templates,
            defaults,
        }
    }

    pub fn default_options(&self) -> &GenerationOptions {
        &self.defaults
    }

    /// 构造两条消息：system = 模板 + 策略上下文，user = 用户原文
    pub fn build_messages(&self, agent_type: &str, user_text: &str, policy_context: &str) -> Vec<Message> {
        let template = self.templates.template_for(agent_type);
        vec![
            Message::system(format!("{}\n\nPolicy Context: {}", template, policy_context)),
            Message::user(user_text),
        ]
    }

    /// 单次生成，错误原样返回（供需要区分失败的调用方使用）
    pub async fn try_generate(
        &self,
        agent_type: &str,
        user_text: &str,
        policy_context: &str,
        options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        let messages = self.build_messages(agent_type, user_text, policy_context);
        self.llm.complete(&messages, options).await
    }

    /// 单次生成；失败时记录日志并返回 GENERATION_FALLBACK
    pub async fn generate(
        &self,
        agent_type: &str,
        user_text: &str,
        policy_context: &str,
        options: &GenerationOptions,
    ) -> String {
        match self.try_generate(agent_type, user_text, policy_context, options).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(backend = self.llm.name(), "generation failed: {}", e);
                GENERATION_FALLBACK.to_string()
            }
        }
    }
}
