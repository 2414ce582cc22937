//! 文件工具：read_file / write_file / list_directory
//!
//! 都委托给绑定项目根目录的 LocalGateway，路径校验与错误归类沿用它的规则。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::gateway::remote::{TOOL_LIST_DIRECTORY, TOOL_READ_FILE, TOOL_WRITE_FILE};
use crate::gateway::{GatewayError, LocalGateway, ToolGateway};
use crate::tools::registry::{parse_args, schema_of, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// 相对项目根目录的路径
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    pub path: String,
    /// 完整的新内容
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDirectoryArgs {
    /// 目录，默认 "."（整个项目）
    #[serde(default)]
    pub path: Option<String>,
}

pub struct ReadFileTool {
    gateway: Arc<LocalGateway>,
}

impl ReadFileTool {
    pub fn new(gateway: Arc<LocalGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        TOOL_READ_FILE
    }

    fn description(&self) -> &str {
        "Read a UTF-8 file inside the project root"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ReadFileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, GatewayError> {
        let args: ReadFileArgs = parse_args(self.name(), args)?;
        tracing::debug!(path = %args.path, "read_file");
        self.gateway.read(&args.path).await
    }
}

pub struct WriteFileTool {
    gateway: Arc<LocalGateway>,
}

impl WriteFileTool {
    pub fn new(gateway: Arc<LocalGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        TOOL_WRITE_FILE
    }

    fn description(&self) -> &str {
        "Replace the full content of a file inside the project root"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WriteFileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, GatewayError> {
        let args: WriteFileArgs = parse_args(self.name(), args)?;
        tracing::info!(path = %args.path, bytes = args.content.len(), "write_file");
        self.gateway.write(&args.path, &args.content).await?;
        Ok(format!("wrote {} bytes to {}", args.content.len(), args.path))
    }
}

/// 返回 JSON 字符串数组（项目相对路径，已排序）
pub struct ListDirectoryTool {
    gateway: Arc<LocalGateway>,
}

impl ListDirectoryTool {
    pub fn new(gateway: Arc<LocalGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        TOOL_LIST_DIRECTORY
    }

    fn description(&self) -> &str {
        "List project files below a directory as a JSON array of relative paths"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ListDirectoryArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, GatewayError> {
        let args: ListDirectoryArgs = parse_args(self.name(), args)?;
        let dir = args
            .path
            .as_deref()
            .map(|p| p.trim().trim_start_matches("./").trim_end_matches('/'))
            .unwrap_or(".");
        let mut files = self.gateway.list_files().await?;
        if !dir.is_empty() && dir != "." {
            let prefix = format!("{dir}/");
            files.retain(|f| f.starts_with(&prefix));
        }
        serde_json::to_string(&files).map_err(|e| GatewayError::Io(e.to_string()))
    }
}
