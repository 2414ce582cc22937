//! 编排器：一轮输入的主控状态机
//!
//! 意图路由 → 读 / 编辑 / 运行 / 撤销 / 偏好 五条轨迹。编辑轨迹在审批门暂停，
//! 批准后进入「应用 → 验证 → 失败则带着累积失败信息重新规划」的有界循环。
//! 每一轮以 Done 或 Failed 结束并回到 Idle；只有审批门会跨轮保留待执行计划。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;

use crate::config::AppConfig;
use crate::core::retry::{RetryController, RetryDecision};
use crate::core::state::{Phase, SessionState};
use crate::core::verifier::{VerificationResult, Verifier};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::edit::{EditApplier, EditPlan, EditPlanner, UndoStack};
use crate::evaluator::ResponseEvaluator;
use crate::gateway::{GatewayError, ToolGateway};
use crate::llm::{Intent, LanguageModel};
use crate::memory::{extract_preferences, MemoryManager};

const APPROVE_TOKENS: &[&str] = &["approve", "yes", "y"];
const REJECT_TOKENS: &[&str] = &["reject", "no", "n"];

const EDIT_TARGET_LIMIT: usize = 3;
const READ_TARGET_LIMIT: usize = 5;
const RECENT_TURNS_FOR_TARGETS: usize = 3;

const KNOWN_EXTENSIONS: &[&str] = &[
    "py", "rs", "js", "ts", "tsx", "jsx", "go", "java", "c", "h", "cpp", "hpp", "rb", "toml",
    "json", "yaml", "yml", "md", "txt", "cfg", "ini", "sh",
];

const DEFAULT_TEST_COMMAND: &str = "pytest -xvs";
const DEFAULT_LINT_COMMAND: &str = "flake8 .";

static PATH_RE: OnceLock<Regex> = OnceLock::new();
static FILE_LINE_RE: OnceLock<Regex> = OnceLock::new();

fn path_re() -> &'static Regex {
    PATH_RE.get_or_init(|| Regex::new(r"^[\w./-]+\.[A-Za-z0-9]+").expect("valid path regex"))
}

/// 测试失败输出中的 `path/to/file.py:42`
fn file_line_re() -> &'static Regex {
    FILE_LINE_RE.get_or_init(|| {
        Regex::new(r"([\w./-]+\.[A-Za-z0-9]+):(\d+)").expect("valid file:line regex")
    })
}

pub fn is_approval(input: &str) -> bool {
    APPROVE_TOKENS.contains(&input.trim().to_lowercase().as_str())
}

pub fn is_rejection(input: &str) -> bool {
    REJECT_TOKENS.contains(&input.trim().to_lowercase().as_str())
}

/// 一轮处理的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Answer {
        text: String,
        cached: bool,
    },
    /// 计划已生成，等待用户 approve / reject
    AwaitingApproval {
        plan: EditPlan,
        summary: String,
    },
    Applied {
        path: String,
        attempts: u32,
        /// 未配置检查命令时为 None
        verification: Option<VerificationResult>,
    },
    Rejected,
    Ran {
        command: String,
        result: VerificationResult,
    },
    Undone {
        path: String,
    },
    PreferenceSet {
        entries: Vec<(String, String)>,
    },
    Notice(String),
}

impl std::fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnOutcome::Answer { text, cached } => {
                if *cached {
                    write!(f, "{text}\n(from cache)")
                } else {
                    f.write_str(text)
                }
            }
            TurnOutcome::AwaitingApproval { summary, .. } => f.write_str(summary),
            TurnOutcome::Applied {
                path,
                attempts,
                verification,
            } => match verification {
                Some(v) if v.passed => {
                    write!(f, "Applied edits to {path}; checks passed (attempt {attempts}).")
                }
                Some(_) => write!(f, "Applied edits to {path}."),
                None => write!(f, "Applied edits to {path}. No check command configured."),
            },
            TurnOutcome::Rejected => f.write_str("Edits cancelled."),
            TurnOutcome::Ran { command, result } => {
                writeln!(f, "$ {command}")?;
                if !result.stdout.is_empty() {
                    writeln!(f, "{}", result.stdout.trim_end())?;
                }
                if !result.stderr.is_empty() {
                    writeln!(f, "{}", result.stderr.trim_end())?;
                }
                write!(f, "(exit {})", result.exit_code)
            }
            TurnOutcome::Undone { path } => write!(f, "Restored {path}."),
            TurnOutcome::PreferenceSet { entries } => {
                f.write_str("Saved preferences:")?;
                for (k, v) in entries {
                    write!(f, "\n- {k}: {v}")?;
                }
                Ok(())
            }
            TurnOutcome::Notice(msg) => f.write_str(msg),
        }
    }
}

/// 运行状态摘要（CLI `stats` 命令）
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub session_id: String,
    pub phase: Phase,
    pub undo_depth: usize,
    pub cache_entries: usize,
    pub session_files: usize,
    pub conversation_turns: usize,
    pub preferences: usize,
    pub execution_log: usize,
}

pub struct Orchestrator {
    session_id: String,
    model: Arc<dyn LanguageModel>,
    gateway: Arc<dyn ToolGateway>,
    planner: EditPlanner,
    applier: EditApplier,
    verifier: Verifier,
    retry: RetryController,
    recovery: RecoveryEngine,
    pub memory: MemoryManager,
    undo: UndoStack,
    state: SessionState,
    evaluator: Option<Arc<ResponseEvaluator>>,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        gateway: Arc<dyn ToolGateway>,
        memory: MemoryManager,
        cfg: &AppConfig,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session_id = %session_id, "session started");
        Self {
            session_id,
            planner: EditPlanner::new(model.clone()),
            applier: EditApplier::new(gateway.clone()),
            verifier: Verifier::new(
                gateway.clone(),
                cfg.verify.command.clone(),
                cfg.verify.timeout_secs,
            ),
            retry: RetryController::new(cfg.retry.max_attempts),
            recovery: RecoveryEngine::new(),
            memory,
            undo: UndoStack::new(),
            state: SessionState::default(),
            evaluator: None,
            model,
            gateway,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<ResponseEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn pending_plan(&self) -> Option<&EditPlan> {
        self.state.pending_plan.as_ref()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            session_id: self.session_id.clone(),
            phase: self.state.phase(),
            undo_depth: self.undo.len(),
            cache_entries: self.memory.cache_len(),
            session_files: self.memory.session.len(),
            conversation_turns: self.memory.session.conversation.len(),
            preferences: self.memory.preferences().len(),
            execution_log: self.memory.execution_log().count(),
        }
    }

    /// 处理一行用户输入
    pub async fn handle_input(&mut self, input: &str) -> Result<TurnOutcome, AgentError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AgentError::Classification("empty input".to_string()));
        }

        if self.state.awaiting_approval() {
            if is_approval(input) {
                let result = self.execute_cycle().await;
                return self.conclude(result);
            }
            if is_rejection(input) {
                tracing::info!("pending plan rejected");
                self.state.pending_plan = None;
                self.state.transition(Phase::Done)?;
                return self.conclude(Ok(TurnOutcome::Rejected));
            }
            // 新指令替换待审批计划，不合并
            tracing::info!("new instruction supersedes pending plan");
            self.state.transition(Phase::Routed)?;
            self.state.pending_plan = None;
            self.state.instruction = None;
            self.retry.reset();
        } else {
            if is_approval(input) || is_rejection(input) {
                return Ok(TurnOutcome::Notice(
                    "No pending plan to approve or reject.".to_string(),
                ));
            }
            self.state.transition(Phase::Routed)?;
        }

        let result = self.dispatch(input).await;
        self.conclude(result)
    }

    async fn dispatch(&mut self, input: &str) -> Result<TurnOutcome, AgentError> {
        let intent = self.model.classify(input).await?;
        tracing::info!(intent = intent.as_str(), "routed");
        self.state.intent = Some(intent);
        self.memory.working.enter(intent.as_str());
        match intent {
            Intent::Read => self.answer(input).await,
            Intent::Edit => self.propose_edit(input).await,
            Intent::Run => self.run_command(input).await,
            Intent::Undo => self.undo_last().await,
            Intent::Preference => self.set_preferences(input),
        }
    }

    /// 收尾：进入终态并回到 Idle；等待审批时原样返回
    fn conclude(
        &mut self,
        result: Result<TurnOutcome, AgentError>,
    ) -> Result<TurnOutcome, AgentError> {
        match result {
            Ok(outcome) => {
                if self.state.awaiting_approval() {
                    return Ok(outcome);
                }
                if !self.state.phase().is_terminal() {
                    self.settle(Phase::Done);
                }
                self.end_turn();
                Ok(outcome)
            }
            Err(err) => {
                if !self.state.phase().is_terminal() {
                    self.settle(Phase::Failed);
                }
                self.memory.working.set_error(err.to_string());
                tracing::warn!(
                    node = self.memory.working.node.as_deref().unwrap_or("route"),
                    error = %err,
                    "turn failed"
                );
                self.memory.log_execution("error", &err.to_string(), false);
                if self.recovery.handle(&err, false) == RecoveryAction::ResetState {
                    tracing::warn!("resetting persistent memory");
                    self.memory.reset_persistent();
                }
                self.end_turn();
                Err(err)
            }
        }
    }

    fn settle(&mut self, to: Phase) {
        if let Err(e) = self.state.transition(to) {
            tracing::error!(error = %e, "could not settle turn");
        }
    }

    fn end_turn(&mut self) {
        self.retry.reset();
        if let Err(e) = self.state.finish() {
            tracing::error!(error = %e, "turn left in a non-terminal phase");
        }
        self.memory.end_turn();
    }

    // ---------- 读 ----------

    async fn answer(&mut self, question: &str) -> Result<TurnOutcome, AgentError> {
        self.state.transition(Phase::Executing)?;
        let targets = self.resolve_targets(question, READ_TARGET_LIMIT).await?;
        let mut files = Vec::with_capacity(targets.len());
        for path in &targets {
            if let Some(content) = self.load_file(path).await? {
                files.push((path.clone(), content));
            }
        }
        self.state.target_files = targets;

        if let Some(text) = self.memory.cached_answer(&files, question) {
            tracing::info!(files = files.len(), "answer served from cache");
            self.memory.add_conversation(question, &text);
            return Ok(TurnOutcome::Answer { text, cached: true });
        }

        let mut context = self.memory.preferences_section();
        context.push_str(&self.memory.build_context(&files));
        let text = self.model.answer(&context, question).await?;
        let write = self.memory.store_answer(&files, question, &text);
        tracing::debug!(?write, "answer cached");
        self.memory.add_conversation(question, &text);

        if let Some(evaluator) = &self.evaluator {
            evaluator.spawn(
                question.to_string(),
                text.clone(),
                Some(context),
                Some(Intent::Read.as_str().to_string()),
            );
        }
        Ok(TurnOutcome::Answer {
            text,
            cached: false,
        })
    }

    /// 会话层优先，未命中再经网关读取；文件不存在返回 None
    ///
    /// 回答缓存的内容哈希取自这里。假定本进程是文件的唯一写入方：
    /// 外部改动不会刷新会话层，可能命中旧哈希下的缓存回答。
    async fn load_file(&mut self, path: &str) -> Result<Option<String>, AgentError> {
        if let Some(content) = self.memory.cached_file(path) {
            return Ok(Some(content));
        }
        self.fresh_content(path).await
    }

    /// 绕过会话层直接从网关读取，并回写会话层与文件哈希
    async fn fresh_content(&mut self, path: &str) -> Result<Option<String>, AgentError> {
        match self.gateway.read(path).await {
            Ok(content) => {
                self.memory.remember_file(path, &content);
                Ok(Some(content))
            }
            Err(GatewayError::NotFound(_)) => {
                tracing::warn!(path, "target file not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ---------- 编辑 ----------

    async fn propose_edit(&mut self, instruction: &str) -> Result<TurnOutcome, AgentError> {
        let targets = self.resolve_targets(instruction, EDIT_TARGET_LIMIT).await?;
        let path = targets.first().cloned().ok_or_else(|| {
            AgentError::Planning("could not determine which file to edit".to_string())
        })?;
        if targets.len() > 1 {
            tracing::info!(path = %path, candidates = targets.len(), "planning against the first target");
        }
        self.state.target_files = targets;

        let content = self.fresh_content(&path).await?;
        let preferences = self.memory.preferences_section();
        let plan = self
            .planner
            .plan(&path, content.as_deref(), instruction, &[], &preferences)
            .await?;

        let summary = plan.summary();
        self.retry.reset();
        self.state.pending_plan = Some(plan.clone());
        self.state.instruction = Some(instruction.to_string());
        self.state.transition(Phase::AwaitingApproval)?;
        tracing::info!(path = %path, edits = plan.edits.len(), "plan awaiting approval");
        Ok(TurnOutcome::AwaitingApproval { plan, summary })
    }

    /// 批准后的应用 → 验证 → 重试循环；每次成功应用都单独留在撤销栈上
    async fn execute_cycle(&mut self) -> Result<TurnOutcome, AgentError> {
        self.state.transition(Phase::Executing)?;
        let mut plan = self
            .state
            .pending_plan
            .clone()
            .ok_or_else(|| AgentError::Planning("no pending plan".to_string()))?;
        let instruction = self.state.instruction.clone().unwrap_or_default();
        let path = plan.file.clone();
        let mut attempt = self.retry.start_attempt(&plan)?;

        loop {
            self.state.retry_count = attempt;
            self.memory.working.retry_count = attempt;
            self.memory.working.enter("apply");
            let report = self
                .applier
                .apply(&plan, &mut self.undo, &mut self.memory)
                .await?;
            tracing::info!(path = %report.path, attempt, operations = report.applied, "plan applied");

            self.state.transition(Phase::Verifying)?;
            self.memory.working.enter("verify");
            let Some(result) = self.verifier.verify().await? else {
                return Ok(TurnOutcome::Applied {
                    path,
                    attempts: attempt,
                    verification: None,
                });
            };
            self.state.last_verification = Some(result.clone());

            if result.passed {
                self.memory.log_execution("verify", &path, true);
                return Ok(TurnOutcome::Applied {
                    path,
                    attempts: attempt,
                    verification: Some(result),
                });
            }

            let failure = match self.recovery.handle(&result.to_error(), true) {
                RecoveryAction::RetryWithContext(context) => context,
                _ => result.failure_message(),
            };
            self.memory
                .log_execution("verify", &format!("{path}: exit {}", result.exit_code), false);

            match self.retry.record_failure(failure) {
                RetryDecision::Exhausted => return Err(self.retry.exhausted()),
                RetryDecision::Retry { next_attempt } => {
                    tracing::warn!(path = %path, next_attempt, "verification failed, replanning");
                    self.state.transition(Phase::Retrying)?;
                    self.state.transition(Phase::Routed)?;
                    self.memory.working.enter("replan");

                    let content = self.fresh_content(&path).await?;
                    let preferences = self.memory.preferences_section();
                    plan = self
                        .planner
                        .plan(
                            &path,
                            content.as_deref(),
                            &instruction,
                            self.retry.failures(),
                            &preferences,
                        )
                        .await?;
                    attempt = self.retry.start_attempt(&plan)?;
                    self.state.pending_plan = Some(plan.clone());
                    self.state.transition(Phase::Executing)?;
                }
            }
        }
    }

    // ---------- 撤销 ----------

    async fn undo_last(&mut self) -> Result<TurnOutcome, AgentError> {
        self.state.transition(Phase::Executing)?;
        let record = self.undo.pop(&*self.gateway).await?;
        self.memory.remember_file(&record.path, &record.snapshot);
        self.memory.log_execution("undo", &record.path, true);
        tracing::info!(path = %record.path, remaining = self.undo.len(), "edit undone");
        Ok(TurnOutcome::Undone { path: record.path })
    }

    // ---------- 运行 ----------

    async fn run_command(&mut self, request: &str) -> Result<TurnOutcome, AgentError> {
        self.state.transition(Phase::Executing)?;
        let command = match quick_command(request, self.verifier.command()) {
            Some(cmd) => cmd,
            None => {
                let files = self.gateway.list_files().await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "could not list project files");
                    Vec::new()
                });
                self.model.command(request, &files).await?
            }
        };
        tracing::info!(command = %command, "running command");

        let result = self.verifier.run(&command).await?;
        self.memory.log_execution("run", &command, result.passed);
        // 失败输出里的 file:line 供后续编辑定位
        self.memory
            .add_conversation(request, &result.failure_message());
        if !result.passed {
            self.state.transition(Phase::Failed)?;
        }
        Ok(TurnOutcome::Ran { command, result })
    }

    // ---------- 偏好 ----------

    fn set_preferences(&mut self, input: &str) -> Result<TurnOutcome, AgentError> {
        self.state.transition(Phase::Executing)?;
        let entries = extract_preferences(input);
        if entries.is_empty() {
            return Err(AgentError::Classification(format!(
                "no preference found in '{input}'; use 'key = value'"
            )));
        }
        for (key, value) in &entries {
            self.memory.set_preference(key, value);
        }
        tracing::info!(count = entries.len(), "preferences saved");
        Ok(TurnOutcome::PreferenceSet { entries })
    }

    // ---------- 目标文件 ----------

    /// 显式路径 → 最近对话里的 file:line → 由模型从项目文件中挑选
    async fn resolve_targets(
        &self,
        request: &str,
        limit: usize,
    ) -> Result<Vec<String>, AgentError> {
        let files = self.gateway.list_files().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not list project files");
            Vec::new()
        });

        let mut targets = explicit_paths(request, &files);
        if targets.is_empty() {
            let recent = self
                .memory
                .recent_conversation_text(RECENT_TURNS_FOR_TARGETS);
            targets = referenced_paths(&recent, &files);
            if targets.is_empty() && !files.is_empty() {
                targets = self
                    .model
                    .select_files(request, &files, &recent, limit)
                    .await?;
            }
        }
        targets.truncate(limit);
        tracing::debug!(?targets, "targets resolved");
        Ok(targets)
    }
}

fn resolve_against(candidate: &str, files: &[String]) -> Option<String> {
    let suffix = format!("/{candidate}");
    files
        .iter()
        .find(|f| *f == candidate || f.ends_with(&suffix))
        .cloned()
}

fn has_known_extension(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| KNOWN_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// 指令中显式提到的路径；项目中不存在但像源码路径的也保留，由规划阶段报告缺失
fn explicit_paths(request: &str, files: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in request.split_whitespace() {
        let token = token.trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | ',' | '(' | ')' | '?' | '!'));
        let Some(m) = path_re().find(token) else {
            continue;
        };
        let candidate = m.as_str().trim_start_matches("./").trim_end_matches('.');
        let resolved = resolve_against(candidate, files)
            .or_else(|| has_known_extension(candidate).then(|| candidate.to_string()));
        if let Some(path) = resolved {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

/// 最近对话中 `file:line` 形式的引用，只保留项目中存在的文件
fn referenced_paths(recent: &str, files: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in file_line_re().captures_iter(recent) {
        let candidate = caps[1].trim_start_matches("./");
        if let Some(path) = resolve_against(candidate, files) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

/// 常见运行请求直接映射为命令，不经过模型
fn quick_command(request: &str, check_command: Option<&str>) -> Option<String> {
    let lower = request.trim().to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    if words.contains(&"lint") {
        return Some(DEFAULT_LINT_COMMAND.to_string());
    }
    if words.iter().any(|w| matches!(*w, "test" | "tests" | "pytest")) {
        return Some(check_command.unwrap_or(DEFAULT_TEST_COMMAND).to_string());
    }
    let trimmed = request.trim();
    let rest = ["run ", "execute "]
        .iter()
        .find(|p| lower.starts_with(**p))
        .and_then(|p| trimmed.get(p.len()..))
        .unwrap_or(trimmed)
        .trim();
    if rest.to_lowercase().starts_with("python") {
        return Some(rest.to_string());
    }
    None
}
