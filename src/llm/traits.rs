//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::complete（非流式）。
//! 错误不在此层重试：限流、超时、服务错误原样上抛，由调用方归类为规划/分类错误。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("LLM request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("LLM service error: {0}")]
    Service(String),
}

impl LlmError {
    /// 从后端错误文本归类
    pub fn from_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let lower = msg.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") {
            LlmError::RateLimited { retry_after_ms: 0 }
        } else if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Timeout { secs: 0 }
        } else {
            LlmError::Service(msg)
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            LlmError::from_message("HTTP 429 Too Many Requests"),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            LlmError::from_message("operation timed out"),
            LlmError::Timeout { .. }
        ));
        assert!(matches!(
            LlmError::from_message("invalid api key"),
            LlmError::Service(_)
        ));
    }
}
