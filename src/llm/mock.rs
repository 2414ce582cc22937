//! Mock LLM 客户端（用于测试与无 API Key 运行）
//!
//! 按顺序返回预置回复并记录调用次数；预置回复耗尽后回显最后一条 User 消息。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Mock 客户端：预置回复队列 + 调用计数
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// 追加一条错误回复（模拟限流、超时等）
    pub fn push_error(&self, err: LlmError) {
        self.replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        if let Some(reply) = next {
            return reply;
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_echo() {
        let mock = MockLlmClient::with_replies(["first"]);
        let msgs = vec![Message::user("hello")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "first");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "Echo from Mock: hello");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let mock = MockLlmClient::new();
        mock.push_error(LlmError::RateLimited { retry_after_ms: 1000 });
        let err = mock.complete(&[Message::user("x")]).await.unwrap_err();
        assert_eq!(err, LlmError::RateLimited { retry_after_ms: 1000 });
    }
}
