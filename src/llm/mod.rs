//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）以及面向编排器的语言模型服务

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod service;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use service::{extract_json_block, Intent, LanguageModel, LlmLanguageModel, PlanRequest};
pub use traits::{LlmClient, LlmError};
