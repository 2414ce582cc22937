//! 组装：由配置构建 LLM 后端、工具网关、记忆管理器与评估器，最终得到 Orchestrator
//!
//! CLI 与集成测试共用同一套初始化逻辑。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::Orchestrator;
use crate::evaluator::ResponseEvaluator;
use crate::gateway::{FallbackGateway, LocalGateway, RemoteGateway, ToolGateway};
use crate::llm::{create_deepseek_client, LanguageModel, LlmClient, LlmLanguageModel, OpenAiClient};
use crate::memory::MemoryManager;

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.request_timeout_secs;
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(crate::llm::MockLlmClient::new());
    }
    // 有 DeepSeek Key，或配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek && provider != "openai" {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model), timeout))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(
            OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            )
            .with_request_timeout(timeout),
        )
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(crate::llm::MockLlmClient::new())
    }
}

/// Agent 构建器：统一配置和初始化编排器的各个组件
pub struct AgentBuilder {
    config: AppConfig,
    project_root: PathBuf,
    llm: Option<Arc<dyn LlmClient>>,
    model: Option<Arc<dyn LanguageModel>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        let project_root = config.project_root();
        Self {
            config,
            project_root,
            llm: None,
            model: None,
        }
    }

    /// 指定 LLM 客户端（测试或自定义后端）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 直接指定语言模型服务，跳过 LlmLanguageModel 包装
    pub fn with_language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        self.llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config))
    }

    /// 直连网关总是存在；配置了远程服务时尝试连接，失败则只用直连
    pub async fn build_gateway(&self) -> Arc<dyn ToolGateway> {
        let direct: Arc<dyn ToolGateway> = Arc::new(LocalGateway::new(&self.project_root));
        let gw = &self.config.gateway;
        let mut gateway = FallbackGateway::new(direct).with_prefer_remote(gw.prefer_remote);
        if gw.prefer_remote && !gw.servers.is_empty() {
            match RemoteGateway::connect(&gw.servers, gw.call_timeout_secs).await {
                Ok(remote) => gateway = gateway.with_remote(Arc::new(remote)),
                Err(e) => tracing::warn!(error = %e, "remote tool channel unavailable, using direct gateway"),
            }
        }
        Arc::new(gateway)
    }

    pub fn build_memory(&self) -> MemoryManager {
        MemoryManager::new(self.config.memory_path(), &self.config.memory)
    }

    /// 评估器（可选）
    pub fn build_evaluator(&self, llm: Arc<dyn LlmClient>) -> Option<Arc<ResponseEvaluator>> {
        self.config
            .app
            .evaluate_responses
            .then(|| Arc::new(ResponseEvaluator::new(llm, self.config.evaluation_path())))
    }

    pub async fn build(&self) -> Orchestrator {
        let llm = self.build_llm();
        let model: Arc<dyn LanguageModel> = match &self.model {
            Some(model) => model.clone(),
            None => Arc::new(LlmLanguageModel::new(llm.clone())),
        };
        let gateway = self.build_gateway().await;
        let orchestrator = Orchestrator::new(model, gateway, self.build_memory(), &self.config);
        match self.build_evaluator(llm) {
            Some(evaluator) => orchestrator.with_evaluator(evaluator),
            None => orchestrator,
        }
    }
}

/// 便捷函数：加载配置（失败时用默认值）并创建构建器
pub fn create_agent_builder(config_path: Option<PathBuf>) -> AgentBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    AgentBuilder::new(config)
}
