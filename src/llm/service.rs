//! 语言模型服务：意图分类、编辑计划、回答、文件选择、命令生成
//!
//! `LanguageModel` 是编排层依赖的能力接口；`LlmLanguageModel` 基于任意 `LlmClient` 实现它。
//! LLM 层错误不在此重试，分类阶段归为 `Classification`，其余归为 `Planning`。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::edit::EditPlan;
use crate::llm::LlmClient;
use crate::core::retry::failures_section;
use crate::memory::{is_key_value, Message};

/// 一轮用户输入走的轨迹
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Read,
    Edit,
    Run,
    Undo,
    Preference,
}

impl Intent {
    /// 解析模型输出的意图词；`profile` 视为偏好
    pub fn parse(word: &str) -> Option<Self> {
        let word = word
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_lowercase();
        match word.as_str() {
            "read" => Some(Intent::Read),
            "edit" => Some(Intent::Edit),
            "run" => Some(Intent::Run),
            "undo" => Some(Intent::Undo),
            "preference" | "profile" => Some(Intent::Preference),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Read => "read",
            Intent::Edit => "edit",
            Intent::Run => "run",
            Intent::Undo => "undo",
            Intent::Preference => "preference",
        }
    }
}

/// 规划输入
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub path: &'a str,
    /// 带行号的文件内容
    pub annotated: &'a str,
    pub instruction: &'a str,
    /// 本轮自动修复累积的全部失败信息（按先后）
    pub failures: &'a [String],
    pub preferences: &'a str,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Intent, AgentError>;

    /// 返回 None 表示模型认为无需改动
    async fn plan(&self, request: &PlanRequest<'_>) -> Result<Option<EditPlan>, AgentError>;

    async fn answer(&self, context: &str, question: &str) -> Result<String, AgentError>;

    /// 从候选文件中挑出与问题相关的（最多 limit 个，只返回候选中存在的）
    async fn select_files(
        &self,
        request: &str,
        candidates: &[String],
        recent: &str,
        limit: usize,
    ) -> Result<Vec<String>, AgentError>;

    /// 把运行请求翻译为一条 shell 命令
    async fn command(&self, request: &str, files: &[String]) -> Result<String, AgentError>;
}

/// 提取 ```json 围栏或裸 `{...}` / `[...]` 中的 JSON 文本
pub fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map_or(rest, |end| &rest[..end]).trim());
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        return Some(rest.find("```").map_or(rest, |end| &rest[..end]).trim());
    }
    let open = trimmed.find(['{', '['])?;
    let close_char = if trimmed[open..].starts_with('{') { '}' } else { ']' };
    let close = trimmed.rfind(close_char)?;
    (close > open).then(|| &trimmed[open..=close])
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

const UNDO_WORDS: &[&str] = &["undo", "revert"];
const RUN_WORDS: &[&str] = &["run", "execute", "test", "tests", "pytest"];
const EDIT_WORDS: &[&str] = &[
    "fix", "change", "modify", "add", "update", "rename", "refactor", "replace", "remove",
    "delete", "implement", "edit",
];
const PREFERENCE_WORDS: &[&str] = &["prefer", "always", "never", "setting", "remember"];

/// 关键词快速分类；命中不了时返回 None 交给模型
pub fn fast_classify(text: &str) -> Option<Intent> {
    let words = words(text);
    let has = |set: &[&str]| words.iter().any(|w| set.contains(&w.as_str()));
    if has(UNDO_WORDS) {
        return Some(Intent::Undo);
    }
    if has(RUN_WORDS) && !has(EDIT_WORDS) {
        return Some(Intent::Run);
    }
    if has(PREFERENCE_WORDS) || is_key_value(text) {
        return Some(Intent::Preference);
    }
    None
}

const CLASSIFY_PROMPT: &str = "Classify intent: read | edit | run | preference | undo\n\n\
- read: understand/view code\n\
- edit: modify/fix/add code\n\
- run: execute command/test\n\
- preference: set preferences\n\
- undo: revert changes\n\n\
Return only the intent word.";

const PLAN_RULES: &str = "Rules:\n\
- Each edit targets ONE line number (use the line numbers shown above)\n\
- 'old' must match the current line EXACTLY (without the line number prefix)\n\
- 'new' is the replacement line (without line number prefix)\n\
- Look at the error message to find the exact line number\n\
- Focus ONLY on the requested change\n\
- If nothing needs to change, return {\"file\": \"<path>\", \"edits\": []}";

/// 基于 `LlmClient` 的实现
pub struct LlmLanguageModel {
    client: Arc<dyn LlmClient>,
}

impl LlmLanguageModel {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }
}

#[async_trait]
impl LanguageModel for LlmLanguageModel {
    async fn classify(&self, text: &str) -> Result<Intent, AgentError> {
        if let Some(intent) = fast_classify(text) {
            tracing::debug!(intent = intent.as_str(), "intent fast path");
            return Ok(intent);
        }
        let reply = self
            .client
            .complete(&[Message::system(CLASSIFY_PROMPT), Message::user(text)])
            .await
            .map_err(AgentError::classification)?;
        let intent = reply
            .split_whitespace()
            .next()
            .and_then(Intent::parse)
            .unwrap_or_else(|| {
                tracing::debug!(reply = %reply, "unrecognized intent, defaulting to read");
                Intent::Read
            });
        Ok(intent)
    }

    async fn plan(&self, request: &PlanRequest<'_>) -> Result<Option<EditPlan>, AgentError> {
        let mut prompt = format!(
            "Generate line-by-line edits for: {}\n\n# File: {}\n{}\n\n",
            request.instruction, request.path, request.annotated
        );
        if !request.preferences.is_empty() {
            prompt.push_str(request.preferences);
            prompt.push('\n');
        }
        if !request.failures.is_empty() {
            prompt.push_str(&failures_section(request.failures));
            prompt.push('\n');
        }
        prompt.push_str(
            "Return JSON with line-by-line edits:\n\
             {\"file\": \"path\", \"edits\": [{\"line\": 85, \"old\": \"    data=json(update_data),\", \"new\": \"    data=json.dumps(update_data),\"}]}\n\n",
        );
        prompt.push_str(PLAN_RULES);

        let reply = self
            .client
            .complete(&[Message::system(prompt)])
            .await
            .map_err(AgentError::planning)?;
        let json = extract_json_block(&reply)
            .ok_or_else(|| AgentError::Planning(format!("no JSON edit plan in reply: {}", preview(&reply))))?;
        let plan: EditPlan = serde_json::from_str(json)
            .map_err(|e| AgentError::Planning(format!("malformed edit plan: {e}")))?;
        Ok((!plan.is_empty()).then_some(plan))
    }

    async fn answer(&self, context: &str, question: &str) -> Result<String, AgentError> {
        let system = format!("Answer the user's question based on the code provided.\n\n{context}");
        self.client
            .complete(&[Message::system(system), Message::user(question)])
            .await
            .map_err(AgentError::planning)
    }

    async fn select_files(
        &self,
        request: &str,
        candidates: &[String],
        recent: &str,
        limit: usize,
    ) -> Result<Vec<String>, AgentError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let context = if recent.is_empty() {
            String::new()
        } else {
            format!("Recent context:\n{}\n\n", preview_n(recent, 500))
        };
        let prompt = format!(
            "{context}Available files:\n{}\n\nRequest: {request}\n\nWhich files are relevant? Return comma-separated list.",
            candidates.join("\n")
        );
        let reply = self
            .client
            .complete(&[Message::system(prompt)])
            .await
            .map_err(AgentError::planning)?;
        let mut selected: Vec<String> = Vec::new();
        for name in reply.split([',', '\n']) {
            let name = name
                .trim()
                .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '-')
                .trim();
            if candidates.iter().any(|c| c == name) && !selected.iter().any(|s| s == name) {
                selected.push(name.to_string());
            }
        }
        selected.truncate(limit);
        Ok(selected)
    }

    async fn command(&self, request: &str, files: &[String]) -> Result<String, AgentError> {
        let files_context = if files.is_empty() {
            "No files found".to_string()
        } else {
            files.iter().take(20).cloned().collect::<Vec<_>>().join("\n")
        };
        let prompt = format!(
            "Convert this user request to a shell command:\n'{request}'\n\n\
             Available files in project:\n{files_context}\n\n\
             Rules:\n\
             - 'run tests' -> [\"pytest\", \"-xvs\"]\n\
             - 'run main file' -> [\"python3\", \"main.py\"]\n\
             - If the user mentions a file name, use its full path from the available files.\n\
             Return only the command as a JSON array of strings."
        );
        let reply = self
            .client
            .complete(&[Message::system(prompt)])
            .await
            .map_err(AgentError::planning)?;
        let json = extract_json_block(&reply).unwrap_or(reply.trim());
        match serde_json::from_str::<Vec<String>>(json) {
            Ok(argv) if !argv.is_empty() => Ok(argv
                .iter()
                .map(|a| shell_quote(a))
                .collect::<Vec<_>>()
                .join(" ")),
            _ if !json.is_empty() && !json.starts_with('[') => Ok(json.to_string()),
            _ => Err(AgentError::Planning(format!(
                "could not parse command from reply: {}",
                preview(&reply)
            ))),
        }
    }
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn preview(s: &str) -> String {
    preview_n(s, 120)
}

fn preview_n(s: &str, n: usize) -> String {
    if s.chars().count() > n {
        format!("{}...", s.chars().take(n).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};

    fn model(replies: &[&str]) -> (Arc<MockLlmClient>, LlmLanguageModel) {
        let mock = Arc::new(MockLlmClient::with_replies(replies.iter().copied()));
        (mock.clone(), LlmLanguageModel::new(mock))
    }

    #[test]
    fn test_extract_json_block() {
        assert_eq!(extract_json_block("```json\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_json_block("sure: {\"a\":1} done"), Some("{\"a\":1}"));
        assert_eq!(extract_json_block("[\"pytest\", \"-q\"]"), Some("[\"pytest\", \"-q\"]"));
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn test_fast_classify() {
        assert_eq!(fast_classify("undo that"), Some(Intent::Undo));
        assert_eq!(fast_classify("run the tests"), Some(Intent::Run));
        assert_eq!(fast_classify("fix the failing test in test_tasks.py"), None);
        assert_eq!(fast_classify("I prefer four-space indents"), Some(Intent::Preference));
        assert_eq!(fast_classify("indent = 4"), Some(Intent::Preference));
        assert_eq!(fast_classify("fix x = 1 in a.py"), None);
        assert_eq!(fast_classify("change y = 2 in util.py"), None);
        assert_eq!(fast_classify("what does main.py do"), None);
        // 子串不算命中
        assert_eq!(fast_classify("explain the runner module"), None);
    }

    #[tokio::test]
    async fn test_classify_uses_llm_and_defaults_to_read() {
        let (mock, lm) = model(&["edit", "something odd"]);
        assert_eq!(lm.classify("make the add function handle None").await.unwrap(), Intent::Edit);
        assert_eq!(lm.classify("hmm").await.unwrap(), Intent::Read);
        assert_eq!(mock.calls(), 2);
        assert_eq!(lm.classify("revert it").await.unwrap(), Intent::Undo);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_classify_error_maps_to_classification() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::RateLimited { retry_after_ms: 500 });
        let lm = LlmLanguageModel::new(mock);
        assert!(matches!(
            lm.classify("hmm").await,
            Err(AgentError::Classification(_))
        ));
    }

    #[tokio::test]
    async fn test_plan_parses_fenced_json() {
        let (_mock, lm) = model(&[
            "Here you go:\n```json\n{\"file\": \"a.py\", \"edits\": [{\"line\": 10, \"old\": \"x = 1\", \"new\": \"x = 2\"}]}\n```",
            "{\"file\": \"a.py\", \"edits\": []}",
            "I cannot help with that",
        ]);
        let req = PlanRequest {
            path: "a.py",
            annotated: "  10 | x = 1",
            instruction: "set x to 2",
            failures: &[],
            preferences: "",
        };
        let plan = lm.plan(&req).await.unwrap().unwrap();
        assert_eq!(plan.edits[0].line, 10);
        assert!(lm.plan(&req).await.unwrap().is_none());
        assert!(matches!(lm.plan(&req).await, Err(AgentError::Planning(_))));
    }

    #[tokio::test]
    async fn test_select_files_filters_unknown_and_limits() {
        let (_mock, lm) = model(&["main.py, ghost.py, routes/users.py, models.py"]);
        let candidates: Vec<String> = ["main.py", "models.py", "routes/users.py"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let picked = lm.select_files("users", &candidates, "", 2).await.unwrap();
        assert_eq!(picked, vec!["main.py".to_string(), "routes/users.py".to_string()]);
    }

    #[tokio::test]
    async fn test_command_from_json_array() {
        let (_mock, lm) = model(&["[\"python3\", \"routes/users.py\"]", "[\"echo\", \"a b\"]"]);
        assert_eq!(lm.command("run users", &[]).await.unwrap(), "python3 routes/users.py");
        assert_eq!(lm.command("say a b", &[]).await.unwrap(), "echo 'a b'");
    }
}
