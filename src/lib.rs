//! codebee - Rust 交互式代码助手
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排状态机、验证、重试控制、错误与恢复、组装
//! - **edit**: 编辑计划、规划、事务式应用、撤销栈
//! - **evaluator**: 回答评分（LLM 作为裁判）
//! - **gateway**: 工具网关（直连 / 远程 JSON-RPC / 回退策略）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）及语言模型服务
//! - **memory**: 工作 / 会话 / 持久三层记忆与回答缓存去重
//! - **observability**: tracing 订阅器
//! - **tools**: 工具注册表与 stdio 工具服务端

pub mod config;
pub mod core;
pub mod edit;
pub mod evaluator;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
