//! 工具服务端一侧：工具注册表、文件与命令工具、stdio JSON-RPC 服务循环

pub mod filesystem;
pub mod registry;
pub mod server;
pub mod shell;

pub use filesystem::{ListDirectoryTool, ReadFileTool, WriteFileTool};
pub use registry::{Tool, ToolRegistry};
pub use server::ToolServer;
pub use shell::ShellTool;
