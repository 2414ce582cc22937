//! 基于 async-openai 的 `LlmClient`
//!
//! 适用于任何 OpenAI 兼容端点（官方、DeepSeek、自建代理）。温度固定为 0：
//! 意图分类、编辑计划都要求确定性输出。

use std::sync::atomic::{AtomicU64, Ordering};

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

const PLACEHOLDER_KEY: &str = "sk-placeholder";

/// 累计 token 用量，供 `stats` 展示
#[derive(Debug, Default)]
pub struct TokenUsage {
    prompt: AtomicU64,
    completion: AtomicU64,
}

impl TokenUsage {
    pub fn record(&self, prompt: u64, completion: u64) {
        self.prompt.fetch_add(prompt, Ordering::Relaxed);
        self.completion.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn snapshot(&self) -> (u64, u64, u64) {
        let prompt = self.prompt.load(Ordering::Relaxed);
        let completion = self.completion.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout_secs: u64,
    usage: TokenUsage,
}

impl OpenAiClient {
    /// `api_key` 为空时读 `OPENAI_API_KEY`；都没有则用占位 key，请求会以 Service 错误失败
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| PLACEHOLDER_KEY.to_string());

        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout_secs: 60,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let content = message.content.clone();
    Ok(match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()?
            .into(),
    })
}

/// 后端错误归入 `LlmError`：API 错误码优先，其余按文本归类
fn map_openai_error(err: OpenAIError, timeout_secs: u64) -> LlmError {
    match err {
        OpenAIError::ApiError(api) => {
            let code = api.code.as_deref().unwrap_or_default();
            let kind = api.r#type.as_deref().unwrap_or_default();
            if code == "rate_limit_exceeded" || kind == "rate_limit_error" {
                LlmError::RateLimited { retry_after_ms: 0 }
            } else {
                LlmError::Service(api.message)
            }
        }
        OpenAIError::Reqwest(e) if e.is_timeout() => LlmError::Timeout { secs: timeout_secs },
        other => LlmError::from_message(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.snapshot()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let secs = self.request_timeout_secs;
        let messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LlmError::Service(e.to_string()))?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.0)
            .messages(messages)
            .build()
            .map_err(|e| LlmError::Service(e.to_string()))?;

        let response = tokio::time::timeout(
            std::time::Duration::from_secs(secs),
            self.client.chat().create(request),
        )
        .await
        .map_err(|_| LlmError::Timeout { secs })?
        .map_err(|e| map_openai_error(e, secs))?;

        if let Some(usage) = &response.usage {
            self.usage
                .record(u64::from(usage.prompt_tokens), u64::from(usage.completion_tokens));
        }
        tracing::debug!(model = %self.model, choices = response.choices.len(), "completion received");

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Service("completion returned no choices".to_string()))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn api_error(code: Option<&str>, kind: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: "boom".to_string(),
            r#type: kind.map(String::from),
            param: None,
            code: code.map(String::from),
        })
    }

    #[test]
    fn test_rate_limit_code_maps_to_rate_limited() {
        assert!(matches!(
            map_openai_error(api_error(Some("rate_limit_exceeded"), None), 30),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            map_openai_error(api_error(None, Some("rate_limit_error")), 30),
            LlmError::RateLimited { .. }
        ));
        assert_eq!(
            map_openai_error(api_error(Some("invalid_api_key"), None), 30),
            LlmError::Service("boom".to_string())
        );
    }

    #[test]
    fn test_invalid_argument_is_service_error() {
        assert!(matches!(
            map_openai_error(OpenAIError::InvalidArgument("model missing".into()), 30),
            LlmError::Service(_)
        ));
    }

    #[test]
    fn test_usage_accumulates() {
        let client = OpenAiClient::new(Some("http://127.0.0.1:9"), "m", Some("k"));
        client.usage.record(10, 5);
        client.usage.record(1, 1);
        assert_eq!(client.token_usage(), (11, 6, 17));
        assert_eq!(client.model(), "m");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let client = OpenAiClient::new(Some("http://127.0.0.1:9"), "m", Some("k")).with_request_timeout(5);
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Service(_) | LlmError::Timeout { .. }));
    }
}
