//! 编辑规划：带行号的文件内容 + 指令 + 累积失败 → 经过滤的 EditPlan
//!
//! 文件缺失或为空、模型认为无需改动、过滤后没有剩余操作，都报 `Planning`。
//! 行号越界与新旧文本相同的操作在交回前被丢弃；期望文本是否与磁盘一致留给应用阶段校验。

use std::sync::Arc;

use crate::core::AgentError;
use crate::edit::plan::{annotate, line_count, EditPlan};
use crate::llm::{LanguageModel, PlanRequest};

pub struct EditPlanner {
    model: Arc<dyn LanguageModel>,
}

impl EditPlanner {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// `content` 为 None 表示目标文件不存在
    pub async fn plan(
        &self,
        path: &str,
        content: Option<&str>,
        instruction: &str,
        failures: &[String],
        preferences: &str,
    ) -> Result<EditPlan, AgentError> {
        let content = content
            .ok_or_else(|| AgentError::Planning(format!("target file {path} does not exist")))?;
        if content.trim().is_empty() {
            return Err(AgentError::Planning(format!("target file {path} is empty")));
        }

        let annotated = annotate(content);
        let request = PlanRequest {
            path,
            annotated: &annotated,
            instruction,
            failures,
            preferences,
        };
        let raw = self
            .model
            .plan(&request)
            .await?
            .ok_or_else(|| AgentError::Planning(format!("no actionable change for {path}")))?;

        if raw.file != path {
            tracing::debug!(planned = %raw.file, target = path, "plan file rebound to target");
        }
        let total = line_count(content);
        let proposed = raw.edits.len();
        let edits: Vec<_> = raw
            .edits
            .into_iter()
            .filter(|op| {
                let in_range = op.line >= 1 && op.line <= total;
                if !in_range {
                    tracing::warn!(line = op.line, total, "dropping out-of-range edit");
                }
                in_range && op.expected != op.replacement
            })
            .collect();
        if edits.is_empty() {
            return Err(AgentError::Planning(format!(
                "no actionable change for {path} ({proposed} proposed operation(s) filtered out)"
            )));
        }
        Ok(EditPlan::new(path, edits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::EditOp;
    use crate::llm::{Intent, MockLlmClient};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 返回固定计划并记录收到的失败上下文
    struct FixedPlan {
        plan: Option<EditPlan>,
        seen_failures: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for FixedPlan {
        async fn classify(&self, _text: &str) -> Result<Intent, AgentError> {
            Ok(Intent::Edit)
        }
        async fn plan(&self, request: &PlanRequest<'_>) -> Result<Option<EditPlan>, AgentError> {
            *self.seen_failures.lock().unwrap() = request.failures.to_vec();
            Ok(self.plan.clone())
        }
        async fn answer(&self, _c: &str, _q: &str) -> Result<String, AgentError> {
            Ok(String::new())
        }
        async fn select_files(
            &self,
            _r: &str,
            _c: &[String],
            _recent: &str,
            _l: usize,
        ) -> Result<Vec<String>, AgentError> {
            Ok(Vec::new())
        }
        async fn command(&self, _r: &str, _f: &[String]) -> Result<String, AgentError> {
            Ok(String::new())
        }
    }

    fn op(line: usize, old: &str, new: &str) -> EditOp {
        EditOp {
            line,
            expected: old.to_string(),
            replacement: new.to_string(),
        }
    }

    fn planner(plan: Option<EditPlan>) -> (Arc<FixedPlan>, EditPlanner) {
        let model = Arc::new(FixedPlan {
            plan,
            seen_failures: Mutex::new(Vec::new()),
        });
        (model.clone(), EditPlanner::new(model))
    }

    #[tokio::test]
    async fn test_absent_and_empty_file() {
        let (_m, p) = planner(None);
        assert!(matches!(
            p.plan("a.py", None, "fix", &[], "").await,
            Err(AgentError::Planning(_))
        ));
        assert!(matches!(
            p.plan("a.py", Some("  \n"), "fix", &[], "").await,
            Err(AgentError::Planning(_))
        ));
    }

    #[tokio::test]
    async fn test_filters_out_of_range_and_noop() {
        let raw = EditPlan::new(
            "elsewhere.py",
            vec![op(2, "b", "B"), op(9, "z", "Z"), op(0, "", "x"), op(1, "a", "a")],
        );
        let (_m, p) = planner(Some(raw));
        let plan = p.plan("a.py", Some("a\nb\n"), "caps", &[], "").await.unwrap();
        assert_eq!(plan.file, "a.py");
        assert_eq!(plan.edits, vec![op(2, "b", "B")]);
    }

    #[tokio::test]
    async fn test_everything_filtered_is_planning_error() {
        let (_m, p) = planner(Some(EditPlan::new("a.py", vec![op(5, "x", "y")])));
        assert!(matches!(
            p.plan("a.py", Some("a\n"), "fix", &[], "").await,
            Err(AgentError::Planning(_))
        ));
    }

    #[tokio::test]
    async fn test_failures_forwarded() {
        let (m, p) = planner(Some(EditPlan::new("a.py", vec![op(1, "a", "b")])));
        let failures = vec!["f1".to_string(), "f2".to_string()];
        p.plan("a.py", Some("a\n"), "fix", &failures, "").await.unwrap();
        assert_eq!(*m.seen_failures.lock().unwrap(), failures);
    }

    #[tokio::test]
    async fn test_with_llm_backed_model() {
        let mock = Arc::new(MockLlmClient::with_replies([
            r#"{"file": "a.py", "edits": [{"line": 1, "old": "x = 1", "new": "x = 2"}]}"#,
        ]));
        let p = EditPlanner::new(Arc::new(crate::llm::LlmLanguageModel::new(mock)));
        let plan = p.plan("a.py", Some("x = 1\n"), "bump x", &[], "").await.unwrap();
        assert_eq!(plan.edits, vec![op(1, "x = 1", "x = 2")]);
    }
}
