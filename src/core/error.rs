//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithContext / ReportToUser / ResetState。

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::llm::LlmError;

/// 一轮对话中可能出现的错误（分类、规划、校验、应用、执行、重试、撤销、持久化）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Intent classification failed: {0}")]
    Classification(String),

    #[error("Planning failed: {0}")]
    Planning(String),

    /// 计划中的 expected 文本与当前文件不一致，或行号越界 / 重叠
    #[error("Validation failed at line {line}: {message}")]
    Validation { line: usize, message: String },

    /// 写入被阻止（未产生任何部分写入）
    #[error("Apply to {path} aborted: {message}")]
    Apply { path: String, message: String },

    #[error("Command failed (exit {exit_code}): {message}")]
    Execution { exit_code: i32, message: String },

    #[error("Verification still failing after {attempts} attempts: {last_failure}")]
    RetryExhausted { attempts: u32, last_failure: String },

    /// 新计划与上一次完全相同，判定为空转并提前终止
    #[error("Retry stalled after {attempts} attempts: planner repeated the previous plan")]
    RetryStalled { attempts: u32, last_failure: String },

    #[error("Nothing to undo")]
    EmptyStack,

    #[error("Persistent memory corrupted: {0}")]
    CacheCorruption(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl AgentError {
    /// 把 LLM 层错误归入分类阶段
    pub fn classification(err: LlmError) -> Self {
        AgentError::Classification(err.to_string())
    }

    /// 把 LLM 层错误归入规划阶段
    pub fn planning(err: LlmError) -> Self {
        AgentError::Planning(err.to_string())
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 把失败信息累积进下一次规划上下文（仅限应用成功后的验证失败）
    RetryWithContext(String),
    /// 直接告知用户，附带可操作的提示
    ReportToUser(String),
    /// 持久化状态损坏：重置为空状态后继续
    ResetState,
}
