//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction：只有「应用成功之后的执行失败」进入重试，
//! 其余错误原样报告给用户，持久化损坏则重置状态。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// `after_apply` 表示错误发生在一次成功应用之后的验证阶段
    pub fn handle(&self, err: &AgentError, after_apply: bool) -> RecoveryAction {
        match err {
            AgentError::Execution { exit_code, message } if after_apply => {
                RecoveryAction::RetryWithContext(format!(
                    "Check failed with exit code {exit_code}:\n{message}"
                ))
            }
            AgentError::CacheCorruption(_) => RecoveryAction::ResetState,
            other => RecoveryAction::ReportToUser(self.user_message(other)),
        }
    }

    /// 面向用户的提示：说明发生了什么以及下一步可以做什么
    pub fn user_message(&self, err: &AgentError) -> String {
        match err {
            AgentError::Classification(msg) => format!(
                "Could not understand the request ({msg}). Try rephrasing, e.g. 'explain main.py' or 'fix the failing test'."
            ),
            AgentError::Planning(msg) => format!(
                "Could not produce an edit plan: {msg}. Name the target file explicitly or describe the change in more detail."
            ),
            AgentError::Validation { line, message } => format!(
                "The plan no longer matches the file at line {line} ({message}). Nothing was written; ask again so the plan is rebuilt from the current content."
            ),
            AgentError::Apply { path, message } => {
                format!("Nothing was written to {path}: {message}")
            }
            AgentError::Execution { exit_code, message } => {
                format!("Command exited with {exit_code}:\n{message}")
            }
            AgentError::RetryExhausted {
                attempts,
                last_failure,
            } => format!(
                "Checks still failing after {attempts} attempts. Every attempt is kept on the undo stack; use 'undo' to step back.\nLast failure:\n{last_failure}"
            ),
            AgentError::RetryStalled {
                attempts,
                last_failure,
            } => format!(
                "Stopped after {attempts} attempts because the same fix was proposed twice. Use 'undo' to step back.\nLast failure:\n{last_failure}"
            ),
            AgentError::EmptyStack => "Nothing to undo.".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_execution_after_apply_retries() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Execution {
            exit_code: 1,
            message: "assert 1 == 2".to_string(),
        };
        match engine.handle(&err, true) {
            RecoveryAction::RetryWithContext(ctx) => assert!(ctx.contains("assert 1 == 2")),
            other => panic!("Expected RetryWithContext, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_execution_outside_edit_is_reported() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Execution {
            exit_code: 2,
            message: "boom".to_string(),
        };
        assert!(matches!(
            engine.handle(&err, false),
            RecoveryAction::ReportToUser(_)
        ));
    }

    #[test]
    fn test_recovery_validation_is_local() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Validation {
            line: 10,
            message: "expected 'x = 1'".to_string(),
        };
        match engine.handle(&err, true) {
            RecoveryAction::ReportToUser(msg) => {
                assert!(msg.contains("line 10"));
                assert!(msg.contains("Nothing was written"));
            }
            other => panic!("Expected ReportToUser, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_corruption_resets() {
        let engine = RecoveryEngine::new();
        let err = AgentError::CacheCorruption("bad json".to_string());
        assert_eq!(engine.handle(&err, false), RecoveryAction::ResetState);
    }

    #[test]
    fn test_recovery_empty_stack() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle(&AgentError::EmptyStack, false),
            RecoveryAction::ReportToUser("Nothing to undo.".to_string())
        );
    }
}
