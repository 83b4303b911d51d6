//! DeepSeek 后端：OpenAI 兼容端点上的预设（固定 base_url，默认 deepseek-chat）

use crate::config::LlmSection;
use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// 可用于 DeepSeek 的 Key：DEEPSEEK_API_KEY；provider = deepseek 时 OPENAI_API_KEY 也可
fn deepseek_api_key(llm: &LlmSection) -> Option<String> {
    non_empty_env("DEEPSEEK_API_KEY").or_else(|| {
        if llm.provider.eq_ignore_ascii_case("deepseek") {
            non_empty_env("OPENAI_API_KEY")
        } else {
            None
        }
    })
}

/// 模型优先级：[llm.deepseek].model > DEEPSEEK_MODEL > deepseek-chat
fn deepseek_model(llm: &LlmSection) -> String {
    llm.deepseek
        .model
        .clone()
        .or_else(|| non_empty_env("DEEPSEEK_MODEL"))
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string())
}

/// 按 [llm] 配置构造 DeepSeek 客户端与模型名；没有可用 Key 时返回 None，由调用方退回其他后端
pub fn deepseek_from_config(llm: &LlmSection) -> Option<(OpenAiClient, String)> {
    let api_key = deepseek_api_key(llm)?;
    let model = deepseek_model(llm);
    let client = OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, Some(api_key.as_str()));
    Some((client, model))
}
