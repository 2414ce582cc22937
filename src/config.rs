//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CODEBEE__*` 覆盖（双下划线表示嵌套，如 `CODEBEE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::gateway::RemoteServerSpec;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub memory: MemorySection,
    pub retry: RetrySection,
    pub verify: VerifySection,
    pub gateway: GatewaySection,
}

/// [app] 段：项目根目录与落盘文件位置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 被操作的代码库根目录，未设置时用当前目录
    pub project_root: Option<PathBuf>,
    /// 持久记忆文件，相对路径按项目根目录解析
    pub memory_file: PathBuf,
    /// 回答评分历史
    pub evaluation_file: PathBuf,
    /// 是否在每轮回答后异步评分
    pub evaluate_responses: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            project_root: None,
            memory_file: PathBuf::from(".codebee/memory.json"),
            evaluation_file: PathBuf::from(".codebee/evaluations.json"),
            evaluate_responses: false,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；真实后端缺少 API Key 时退回 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub deepseek: LlmModelOverride,
    pub openai: LlmModelOverride,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            deepseek: LlmModelOverride::default(),
            openai: LlmModelOverride::default(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelOverride {
    pub model: Option<String>,
}

/// [memory] 段：各层容量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub session_max_files: usize,
    pub conversation_turns: usize,
    pub cache_max_entries: usize,
    pub similarity_threshold: f64,
    pub execution_log_cap: usize,
    pub max_response_chars: usize,
    /// 构建上下文时的字符预算
    pub context_max_chars: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            session_max_files: 30,
            conversation_turns: 10,
            cache_max_entries: 500,
            similarity_threshold: 0.70,
            execution_log_cap: 50,
            max_response_chars: 5000,
            context_max_chars: 40_000,
        }
    }
}

/// [retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// 包含首次应用在内的最大尝试次数
    pub max_attempts: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// [verify] 段：应用后运行的检查命令
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifySection {
    /// 为空时不验证，应用即完成
    pub command: Option<String>,
    pub timeout_secs: u64,
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 30,
        }
    }
}

/// [gateway] 段：远程工具通道
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub prefer_remote: bool,
    /// 远程工具服务器（name + argv）；为空时只用直连
    pub servers: Vec<RemoteServerSpec>,
    pub call_timeout_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            prefer_remote: true,
            servers: Vec::new(),
            call_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    pub fn project_root(&self) -> PathBuf {
        self.app
            .project_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn under_root(&self, path: &PathBuf) -> PathBuf {
        if path.is_absolute() {
            path.clone()
        } else {
            self.project_root().join(path)
        }
    }

    pub fn memory_path(&self) -> PathBuf {
        self.under_root(&self.app.memory_file)
    }

    pub fn evaluation_path(&self) -> PathBuf {
        self.under_root(&self.app.evaluation_file)
    }
}

/// 从 config 目录加载配置，环境变量 CODEBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CODEBEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CODEBEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
