//! 远程工具通道：stdio 上的 JSON-RPC 2.0（initialize / tools/list / tools/call）
//!
//! 每个服务进程一条连接；启动时握手并发现可用工具，调用时按工具名路由到声明了该工具的服务。
//! 传输层失败（进程退出、读写失败、超时、工具未声明）一律报告为 `GatewayError::Connection`，
//! 由 `FallbackGateway` 决定是否回退。

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::gateway::{ExecOutput, GatewayError, ToolGateway, WireError};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// 工具名（服务端与客户端共用）
pub const TOOL_READ_FILE: &str = "read_file";
pub const TOOL_WRITE_FILE: &str = "write_file";
pub const TOOL_LIST_DIRECTORY: &str = "list_directory";
pub const TOOL_EXECUTE_COMMAND: &str = "execute_command";

/// 远程服务配置：名称与启动命令（argv）
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RemoteServerSpec {
    pub name: String,
    pub command: Vec<String>,
}

/// 单个服务进程的连接
struct Connection {
    name: String,
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    tools: HashSet<String>,
}

impl Connection {
    async fn spawn(spec: &RemoteServerSpec) -> Result<Self, GatewayError> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| GatewayError::Connection(format!("{}: empty command", spec.name)))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::Connection(format!("{}: spawn failed: {e}", spec.name)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::Connection(format!("{}: no stdin", spec.name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Connection(format!("{}: no stdout", spec.name)))?;
        Ok(Self {
            name: spec.name.clone(),
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            tools: HashSet::new(),
        })
    }

    async fn send(&mut self, message: &Value) -> Result<(), GatewayError> {
        let mut line = message.to_string();
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| GatewayError::Connection(format!("{}: write failed: {e}", self.name)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| GatewayError::Connection(format!("{}: flush failed: {e}", self.name)))
    }

    /// 发送请求并读取 id 相同的响应（跳过通知与其他 id）
    async fn request(
        &mut self,
        id: u64,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        let name = self.name.clone();
        let read = async {
            loop {
                let line = self
                    .stdout
                    .next_line()
                    .await
                    .map_err(|e| GatewayError::Connection(format!("{name}: read failed: {e}")))?
                    .ok_or_else(|| GatewayError::Connection(format!("{name}: server closed")))?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let msg: Value = match serde_json::from_str(line) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!(server = %name, error = %e, "skipping non-JSON line");
                        continue;
                    }
                };
                if msg.get("id").and_then(Value::as_u64) != Some(id) {
                    continue;
                }
                if let Some(err) = msg.get("error") {
                    return Err(GatewayError::Connection(format!("{name}: rpc error: {err}")));
                }
                return Ok(msg.get("result").cloned().unwrap_or(Value::Null));
            }
        };
        tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| GatewayError::Connection(format!("{name}: {method} timed out")))?
    }
}

/// 远程网关：持有若干服务连接，按工具名分发调用
pub struct RemoteGateway {
    connections: Vec<Mutex<Connection>>,
    next_id: AtomicU64,
    call_timeout: Duration,
}

impl RemoteGateway {
    /// 启动并握手所有服务；单个服务失败仅告警，全部失败时返回 Connection 错误
    pub async fn connect(
        specs: &[RemoteServerSpec],
        call_timeout_secs: u64,
    ) -> Result<Self, GatewayError> {
        let gateway_timeout = Duration::from_secs(call_timeout_secs);
        let mut connections = Vec::new();
        let mut next_id = 1u64;

        for spec in specs {
            match Self::handshake(spec, &mut next_id, gateway_timeout).await {
                Ok(conn) => {
                    tracing::info!(
                        server = %conn.name,
                        tools = conn.tools.len(),
                        "remote tool server ready"
                    );
                    connections.push(Mutex::new(conn));
                }
                Err(e) => tracing::warn!(server = %spec.name, error = %e, "remote tool server unavailable"),
            }
        }

        if connections.is_empty() {
            return Err(GatewayError::Connection(
                "no remote tool server available".to_string(),
            ));
        }
        Ok(Self {
            connections,
            next_id: AtomicU64::new(next_id),
            call_timeout: gateway_timeout,
        })
    }

    async fn handshake(
        spec: &RemoteServerSpec,
        next_id: &mut u64,
        timeout: Duration,
    ) -> Result<Connection, GatewayError> {
        let mut conn = Connection::spawn(spec).await?;
        let init_id = *next_id;
        *next_id += 1;
        conn.request(
            init_id,
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "codebee", "version": env!("CARGO_PKG_VERSION") },
            }),
            timeout,
        )
        .await?;
        conn.send(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await?;

        let list_id = *next_id;
        *next_id += 1;
        let listed = conn.request(list_id, "tools/list", json!({}), timeout).await?;
        conn.tools = listed
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(conn)
    }

    /// 已发现的工具（服务名, 工具名）
    pub async fn discovered_tools(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for conn in &self.connections {
            let conn = conn.lock().await;
            let mut names: Vec<&String> = conn.tools.iter().collect();
            names.sort();
            out.extend(names.into_iter().map(|t| (conn.name.clone(), t.clone())));
        }
        out
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        for conn in &self.connections {
            let mut conn = conn.lock().await;
            if !conn.tools.contains(tool) {
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let result = conn
                .request(
                    id,
                    "tools/call",
                    json!({ "name": tool, "arguments": arguments }),
                    timeout,
                )
                .await?;
            return parse_tool_result(&result);
        }
        Err(GatewayError::Connection(format!(
            "no remote server offers '{tool}'"
        )))
    }
}

/// 解析 tools/call 结果：`content[0].text`；`isError` 时把文本解析为错误
pub fn parse_tool_result(result: &Value) -> Result<String, GatewayError> {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.iter().find_map(|c| c.get("text").and_then(Value::as_str)))
        .unwrap_or("")
        .to_string();
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_error {
        return Ok(text);
    }
    if let Ok(wire) = serde_json::from_str::<WireError>(&text) {
        return Err(wire.into());
    }
    // 第三方服务的纯文本错误：按关键词归类
    let lower = text.to_lowercase();
    if lower.contains("enoent") || lower.contains("no such file") || lower.contains("not found") {
        Err(GatewayError::NotFound(text))
    } else if lower.contains("eacces") || lower.contains("permission") || lower.contains("access denied") {
        Err(GatewayError::Permission(text))
    } else {
        Err(GatewayError::Io(text))
    }
}

#[async_trait]
impl ToolGateway for RemoteGateway {
    fn name(&self) -> &str {
        "remote"
    }

    async fn read(&self, path: &str) -> Result<String, GatewayError> {
        self.call_tool(TOOL_READ_FILE, json!({ "path": path }), self.call_timeout)
            .await
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), GatewayError> {
        self.call_tool(
            TOOL_WRITE_FILE,
            json!({ "path": path, "content": content }),
            self.call_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn execute(&self, command: &str, timeout_secs: u64) -> Result<ExecOutput, GatewayError> {
        // 通道超时要比命令超时宽，服务端自己的超时才会以 TimedOut 返回
        let timeout = self
            .call_timeout
            .max(Duration::from_secs(timeout_secs.saturating_add(5)));
        let text = self
            .call_tool(
                TOOL_EXECUTE_COMMAND,
                json!({ "command": command, "timeout_secs": timeout_secs }),
                timeout,
            )
            .await?;
        serde_json::from_str(&text)
            .map_err(|e| GatewayError::Connection(format!("bad execute_command payload: {e}")))
    }

    async fn list_files(&self) -> Result<Vec<String>, GatewayError> {
        let text = self
            .call_tool(TOOL_LIST_DIRECTORY, json!({ "path": "." }), self.call_timeout)
            .await?;
        match serde_json::from_str::<Vec<String>>(&text) {
            Ok(files) => Ok(files),
            Err(_) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_result_text() {
        let result = json!({ "content": [{ "type": "text", "text": "x = 1\n" }] });
        assert_eq!(parse_tool_result(&result).unwrap(), "x = 1\n");
    }

    #[test]
    fn test_parse_tool_result_structured_error() {
        let result = json!({
            "content": [{ "type": "text", "text": "{\"code\":\"not_found\",\"message\":\"a.py\"}" }],
            "isError": true
        });
        assert_eq!(
            parse_tool_result(&result).unwrap_err(),
            GatewayError::NotFound("a.py".to_string())
        );
    }

    #[test]
    fn test_parse_tool_result_plain_text_error() {
        let result = json!({
            "content": [{ "type": "text", "text": "EACCES: permission denied, open 'x'" }],
            "isError": true
        });
        assert!(matches!(
            parse_tool_result(&result),
            Err(GatewayError::Permission(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_with_missing_binary_fails_as_connection() {
        let specs = vec![RemoteServerSpec {
            name: "ghost".to_string(),
            command: vec!["definitely-not-a-real-binary-xyz".to_string()],
        }];
        let err = RemoteGateway::connect(&specs, 2).await.err().unwrap();
        assert!(matches!(err, GatewayError::Connection(_)));
    }
}
