//! execute_command：在项目根目录执行一条 shell 命令
//!
//! 危险子串检查与超时由 LocalGateway 负责；结果以 JSON 形式的 ExecOutput 返回，
//! 超时以 `timed_out` 错误体返回，客户端据此还原为 `GatewayError::TimedOut`。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::gateway::remote::TOOL_EXECUTE_COMMAND;
use crate::gateway::{GatewayError, LocalGateway, ToolGateway};
use crate::tools::registry::{parse_args, schema_of, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteCommandArgs {
    /// 通过 sh -c 执行的命令
    pub command: String,
    /// 超时秒数，缺省用服务端配置
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

pub struct ShellTool {
    gateway: Arc<LocalGateway>,
    default_timeout_secs: u64,
}

impl ShellTool {
    pub fn new(gateway: Arc<LocalGateway>, default_timeout_secs: u64) -> Self {
        Self {
            gateway,
            default_timeout_secs,
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        TOOL_EXECUTE_COMMAND
    }

    fn description(&self) -> &str {
        "Run a shell command in the project root and return {exit_code, stdout, stderr}"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ExecuteCommandArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, GatewayError> {
        let args: ExecuteCommandArgs = parse_args(self.name(), args)?;
        let timeout = args.timeout_secs.unwrap_or(self.default_timeout_secs);
        let output = self.gateway.execute(&args.command, timeout).await?;
        serde_json::to_string(&output).map_err(|e| GatewayError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ExecOutput;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_execute_returns_exec_output_json() {
        let dir = TempDir::new().unwrap();
        let tool = ShellTool::new(Arc::new(LocalGateway::new(dir.path())), 5);
        let text = tool
            .execute(json!({ "command": "echo hi; exit 3" }))
            .await
            .unwrap();
        let out: ExecOutput = serde_json::from_str(&text).unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn test_forbidden_and_timeout() {
        let dir = TempDir::new().unwrap();
        let tool = ShellTool::new(Arc::new(LocalGateway::new(dir.path())), 5);
        assert!(matches!(
            tool.execute(json!({ "command": "mkfs /dev/sda" })).await,
            Err(GatewayError::Permission(_))
        ));
        assert_eq!(
            tool.execute(json!({ "command": "sleep 3", "timeout_secs": 1 }))
                .await
                .unwrap_err(),
            GatewayError::TimedOut { secs: 1 }
        );
    }
}
