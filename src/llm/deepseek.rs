//! DeepSeek 后端：OpenAI 兼容协议，复用 `OpenAiClient`
//!
//! 默认 provider。key 取 `DEEPSEEK_API_KEY`，其次 `OPENAI_API_KEY`；模型依次取配置、
//! `DEEPSEEK_MODEL`、`deepseek-chat`。

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
/// 推理模型；编辑计划偏慢，适合难改的文件
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

fn resolve_model(configured: Option<&str>, env_model: Option<String>) -> String {
    configured
        .filter(|m| !m.trim().is_empty())
        .map(String::from)
        .or(env_model)
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string())
}

fn resolve_api_key() -> Option<String> {
    std::env::var("DEEPSEEK_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok()
}

pub fn create_deepseek_client(model: Option<&str>, request_timeout_secs: u64) -> OpenAiClient {
    let model = resolve_model(model, std::env::var("DEEPSEEK_MODEL").ok());
    tracing::debug!(model = %model, "using DeepSeek backend");
    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, resolve_api_key().as_deref())
        .with_request_timeout(request_timeout_secs)
}
