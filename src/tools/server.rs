//! 工具服务端：stdio 上的 JSON-RPC 2.0
//!
//! 每行一条消息。支持 initialize、tools/list、tools/call；通知（无 id）不回复。
//! 工具错误不是 RPC 错误：以 `isError: true` 的结果返回，文本为 WireError JSON。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::gateway::remote::PROTOCOL_VERSION;
use crate::gateway::{LocalGateway, WireError};
use crate::tools::filesystem::{ListDirectoryTool, ReadFileTool, WriteFileTool};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ShellTool;

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub struct ToolServer {
    registry: ToolRegistry,
}

impl ToolServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// 标准工具集：文件读写、列目录、执行命令，全部绑定到 `gateway` 的根目录
    pub fn for_project(gateway: Arc<LocalGateway>, command_timeout_secs: u64) -> Self {
        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool::new(gateway.clone()));
        registry.register(WriteFileTool::new(gateway.clone()));
        registry.register(ListDirectoryTool::new(gateway.clone()));
        registry.register(ShellTool::new(gateway, command_timeout_secs));
        Self::new(registry)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 处理一行消息；通知返回 None
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let req: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => return Some(JsonRpcResponse::error(Value::Null, PARSE_ERROR, e.to_string())),
        };
        let id = req.id?;

        let response = match req.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": "codebee-tools", "version": env!("CARGO_PKG_VERSION") },
                }),
            ),
            "tools/list" => {
                JsonRpcResponse::success(id, json!({ "tools": self.registry.to_tool_list() }))
            }
            "tools/call" => match serde_json::from_value::<ToolCallParams>(req.params) {
                Ok(params) => JsonRpcResponse::success(id, self.call(params).await),
                Err(e) => JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string()),
            },
            other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Unknown method: {other}")),
        };
        Some(response)
    }

    async fn call(&self, params: ToolCallParams) -> Value {
        tracing::debug!(tool = %params.name, "tools/call");
        match self.registry.execute(&params.name, params.arguments).await {
            Ok(text) => json!({ "content": [{ "type": "text", "text": text }] }),
            Err(e) => {
                let wire = serde_json::to_string(&WireError::from(&e))
                    .unwrap_or_else(|_| e.to_string());
                json!({ "content": [{ "type": "text", "text": wire }], "isError": true })
            }
        }
    }

    /// 逐行读取请求并写回响应，直到输入结束
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(line).await {
                let mut out = serde_json::to_string(&response)?;
                out.push('\n');
                writer.write_all(out.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        tracing::info!("tool server input closed");
        Ok(())
    }
}
