//! 验证：通过网关执行检查命令并归类结果
//!
//! 超时视为一次失败的验证（exit_code = -1，`timed_out` 置位），与非零退出同样计入重试预算。

use std::sync::Arc;

use serde::Serialize;

use crate::core::AgentError;
use crate::gateway::{GatewayError, ToolGateway};

const STDOUT_CONTEXT_CHARS: usize = 1000;
const STDERR_CONTEXT_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl VerificationResult {
    /// 进入下一次规划上下文的失败描述
    pub fn failure_message(&self) -> String {
        if self.timed_out {
            return "Check command timed out".to_string();
        }
        format!(
            "Exit code {}\n{}\n{}",
            self.exit_code,
            tail(&self.stdout, STDOUT_CONTEXT_CHARS),
            tail(&self.stderr, STDERR_CONTEXT_CHARS)
        )
        .trim_end()
        .to_string()
    }

    pub fn to_error(&self) -> AgentError {
        AgentError::Execution {
            exit_code: self.exit_code,
            message: self.failure_message(),
        }
    }
}

/// 保留末尾部分（测试失败摘要通常在最后）
fn tail(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

pub struct Verifier {
    gateway: Arc<dyn ToolGateway>,
    command: Option<String>,
    timeout_secs: u64,
}

impl Verifier {
    pub fn new(gateway: Arc<dyn ToolGateway>, command: Option<String>, timeout_secs: u64) -> Self {
        Self {
            gateway,
            command,
            timeout_secs,
        }
    }

    /// 配置的检查命令（空白视为未配置）
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn enabled(&self) -> bool {
        self.command().is_some()
    }

    /// 运行检查命令；未配置时返回 None
    pub async fn verify(&self) -> Result<Option<VerificationResult>, AgentError> {
        match self.command() {
            Some(cmd) => self.run(cmd).await.map(Some),
            None => Ok(None),
        }
    }

    /// 执行任意命令并归类；超时不是错误，其余网关错误原样上抛
    pub async fn run(&self, command: &str) -> Result<VerificationResult, AgentError> {
        match self.gateway.execute(command, self.timeout_secs).await {
            Ok(out) => Ok(VerificationResult {
                passed: out.success(),
                exit_code: out.exit_code,
                stdout: out.stdout,
                stderr: out.stderr,
                timed_out: false,
            }),
            Err(GatewayError::TimedOut { secs }) => {
                tracing::warn!(command, secs, "check command timed out");
                Ok(VerificationResult {
                    passed: false,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("timed out after {secs}s"),
                    timed_out: true,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
