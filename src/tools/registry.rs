//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），
//! 由 ToolRegistry 按名注册与查找；工具服务端据此响应 tools/list 与 tools/call。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::gateway::GatewayError;

/// 工具 trait：名称、描述、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema（tools/list 中的 inputSchema）
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, GatewayError>;
}

/// 由参数结构体生成 JSON Schema
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
}

/// 解析工具参数；格式不符报 Io 错误（不会触发回退）
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, GatewayError> {
    serde_json::from_value(args)
        .map_err(|e| GatewayError::Io(format!("{tool}: invalid arguments: {e}")))
}

/// 工具注册表：按名称有序存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, GatewayError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| GatewayError::NotFound(format!("unknown tool: {name}")))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// tools/list 的 `tools` 数组
    pub fn to_tool_list(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "inputSchema": tool.parameters_schema()
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        /// 回显文本
        text: String,
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text back"
        }
        fn parameters_schema(&self) -> Value {
            schema_of::<EchoArgs>()
        }
        async fn execute(&self, args: Value) -> Result<String, GatewayError> {
            let args: EchoArgs = parse_args(self.name(), args)?;
            Ok(args.text)
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        assert_eq!(reg.tool_names(), vec!["echo"]);
        let out = reg
            .execute("echo", serde_json::json!({ "text": "hi" }))
            .await
            .unwrap();
        assert_eq!(out, "hi");
        assert!(matches!(
            reg.execute("missing", Value::Null).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            reg.execute("echo", serde_json::json!({})).await,
            Err(GatewayError::Io(_))
        ));
    }

    #[test]
    fn test_tool_list_carries_schema() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        let list = reg.to_tool_list();
        assert_eq!(list[0]["name"], "echo");
        assert!(list[0]["inputSchema"]["properties"]["text"].is_object());
    }
}
