//! 事务式应用：写入前读取实时内容并校验全部操作，任一不符则零写入
//!
//! 成功路径：写入新内容 → 以原内容压入撤销栈 → 更新会话层缓存与文件哈希 → 记执行日志。

use std::sync::Arc;

use crate::core::AgentError;
use crate::edit::plan::{self, EditPlan};
use crate::edit::undo::{EditRecord, UndoStack};
use crate::gateway::ToolGateway;
use crate::memory::MemoryManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub path: String,
    pub applied: usize,
    pub content: String,
}

pub struct EditApplier {
    gateway: Arc<dyn ToolGateway>,
}

impl EditApplier {
    pub fn new(gateway: Arc<dyn ToolGateway>) -> Self {
        Self { gateway }
    }

    pub async fn apply(
        &self,
        plan: &EditPlan,
        undo: &mut UndoStack,
        memory: &mut MemoryManager,
    ) -> Result<ApplyReport, AgentError> {
        let path = plan.file.as_str();
        let live = self
            .gateway
            .read(path)
            .await
            .map_err(|e| AgentError::Apply {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let updated = plan::render(plan, &live)?;

        self.gateway
            .write(path, &updated)
            .await
            .map_err(|e| AgentError::Apply {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        undo.push(EditRecord::new(path, live));
        memory.remember_file(path, &updated);
        memory.log_execution(
            "edit",
            &format!("{} operation(s) on {}", plan.edits.len(), path),
            true,
        );
        tracing::info!(path, applied = plan.edits.len(), undo_depth = undo.len(), "edit applied");

        Ok(ApplyReport {
            path: path.to_string(),
            applied: plan.edits.len(),
            content: updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySection;
    use crate::edit::EditOp;
    use crate::gateway::LocalGateway;
    use tempfile::TempDir;

    fn ten_lines() -> String {
        (1..=10)
            .map(|i| if i == 10 { "x = 1".to_string() } else { format!("# line {i}") })
            .collect::<Vec<_>>()
            .join("\n")
            + "\n"
    }

    fn setup(dir: &TempDir) -> (Arc<LocalGateway>, EditApplier, MemoryManager) {
        let gw = Arc::new(LocalGateway::new(dir.path()));
        let applier = EditApplier::new(gw.clone());
        let memory = MemoryManager::new(dir.path().join(".mem.json"), &MemorySection::default());
        (gw, applier, memory)
    }

    #[tokio::test]
    async fn test_apply_then_undo_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let (gw, applier, mut memory) = setup(&dir);
        let original = ten_lines();
        gw.write("a.py", &original).await.unwrap();

        let plan = EditPlan::new(
            "a.py",
            vec![EditOp {
                line: 10,
                expected: "x = 1".to_string(),
                replacement: "x = 2".to_string(),
            }],
        );
        let mut undo = UndoStack::new();
        let report = applier.apply(&plan, &mut undo, &mut memory).await.unwrap();
        assert_eq!(report.applied, 1);
        assert!(gw.read("a.py").await.unwrap().ends_with("x = 2\n"));
        assert_eq!(memory.cached_file("a.py").as_deref(), Some(report.content.as_str()));
        assert_eq!(undo.len(), 1);

        undo.pop(&*gw).await.unwrap();
        assert_eq!(gw.read("a.py").await.unwrap(), original);
        assert!(matches!(undo.pop(&*gw).await, Err(AgentError::EmptyStack)));
        assert_eq!(gw.read("a.py").await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_mismatch_writes_nothing_and_pushes_nothing() {
        let dir = TempDir::new().unwrap();
        let (gw, applier, mut memory) = setup(&dir);
        let original = ten_lines();
        gw.write("a.py", &original).await.unwrap();

        let plan = EditPlan::new(
            "a.py",
            vec![
                EditOp {
                    line: 1,
                    expected: "# line 1".to_string(),
                    replacement: "# first".to_string(),
                },
                EditOp {
                    line: 10,
                    expected: "x = 99".to_string(),
                    replacement: "x = 2".to_string(),
                },
            ],
        );
        let mut undo = UndoStack::new();
        let err = applier.apply(&plan, &mut undo, &mut memory).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation { line: 10, .. }));
        assert_eq!(gw.read("a.py").await.unwrap(), original);
        assert!(undo.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_apply_error() {
        let dir = TempDir::new().unwrap();
        let (_gw, applier, mut memory) = setup(&dir);
        let plan = EditPlan::new(
            "nope.py",
            vec![EditOp {
                line: 1,
                expected: "a".to_string(),
                replacement: "b".to_string(),
            }],
        );
        let mut undo = UndoStack::new();
        assert!(matches!(
            applier.apply(&plan, &mut undo, &mut memory).await,
            Err(AgentError::Apply { .. })
        ));
        assert!(undo.is_empty());
    }
}
