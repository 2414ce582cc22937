//! 工具网关：文件读写与命令执行的能力集合
//!
//! 两种实现：`LocalGateway`（进程内直连）与 `RemoteGateway`（stdio JSON-RPC 工具通道），
//! 由 `FallbackGateway` 作为策略对象组合：优先远程，连接失败时透明回退到直连，并记录每次调用的路径。

pub mod fallback;
pub mod local;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fallback::{FallbackGateway, GatewayRoute, RouteStats};
pub use local::LocalGateway;
pub use remote::{RemoteGateway, RemoteServerSpec};

/// 网关调用错误；只有 `Connection` 会触发回退
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Timed out after {secs}s")]
    TimedOut { secs: u64 },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Permission(_) => "permission",
            GatewayError::TimedOut { .. } => "timed_out",
            GatewayError::Connection(_) => "connection",
            GatewayError::Io(_) => "io",
        }
    }

    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => GatewayError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => GatewayError::Permission(path.to_string()),
            _ => GatewayError::Io(format!("{path}: {err}")),
        }
    }
}

/// 工具通道上传输的错误体：`{"code": "...", "message": "...", "secs": n}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub secs: u64,
}

impl From<&GatewayError> for WireError {
    fn from(err: &GatewayError) -> Self {
        let secs = match err {
            GatewayError::TimedOut { secs } => *secs,
            _ => 0,
        };
        let message = match err {
            GatewayError::NotFound(m)
            | GatewayError::Permission(m)
            | GatewayError::Connection(m)
            | GatewayError::Io(m) => m.clone(),
            GatewayError::TimedOut { .. } => err.to_string(),
        };
        Self {
            code: err.code().to_string(),
            message,
            secs,
        }
    }
}

impl From<WireError> for GatewayError {
    fn from(wire: WireError) -> Self {
        match wire.code.as_str() {
            "not_found" => GatewayError::NotFound(wire.message),
            "permission" => GatewayError::Permission(wire.message),
            "timed_out" => GatewayError::TimedOut { secs: wire.secs },
            "connection" => GatewayError::Connection(wire.message),
            _ => GatewayError::Io(wire.message),
        }
    }
}

/// 命令执行结果（退出码与输出），超时不在此体现而是 `GatewayError::TimedOut`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 网关能力集：read / write / execute，外加列出项目文件（用于目标文件选择）
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// 实现名称，用于诊断日志
    fn name(&self) -> &str;

    async fn read(&self, path: &str) -> Result<String, GatewayError>;

    async fn write(&self, path: &str, content: &str) -> Result<(), GatewayError>;

    async fn execute(&self, command: &str, timeout_secs: u64) -> Result<ExecOutput, GatewayError>;

    /// 项目内文件（相对路径，`/` 分隔，已排序）
    async fn list_files(&self) -> Result<Vec<String>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_error_preserves_kind() {
        let cases = vec![
            GatewayError::NotFound("a.py".to_string()),
            GatewayError::Permission("/etc/passwd".to_string()),
            GatewayError::TimedOut { secs: 30 },
            GatewayError::Io("disk full".to_string()),
        ];
        for err in cases {
            let wire = WireError::from(&err);
            let back = GatewayError::from(wire);
            assert_eq!(back, err);
        }
    }

    #[test]
    fn test_unknown_wire_code_is_io() {
        let wire = WireError {
            code: "weird".to_string(),
            message: "??".to_string(),
            secs: 0,
        };
        assert_eq!(GatewayError::from(wire), GatewayError::Io("??".to_string()));
    }
}
