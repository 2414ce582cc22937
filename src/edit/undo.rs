//! 撤销栈：每次成功应用前的整文件快照（后进先出，不设上限）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::gateway::ToolGateway;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRecord {
    pub path: String,
    /// 应用前的完整内容
    pub snapshot: String,
    pub timestamp: DateTime<Utc>,
}

impl EditRecord {
    pub fn new(path: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            snapshot: snapshot.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct UndoStack {
    records: Vec<EditRecord>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只应由成功的应用调用
    pub fn push(&mut self, record: EditRecord) {
        self.records.push(record);
    }

    /// 把栈顶记录的快照原样写回并移除该记录；写回失败时记录保留在栈上
    pub async fn pop(&mut self, gateway: &dyn ToolGateway) -> Result<EditRecord, AgentError> {
        let record = self.records.pop().ok_or(AgentError::EmptyStack)?;
        if let Err(e) = gateway.write(&record.path, &record.snapshot).await {
            tracing::warn!(path = %record.path, error = %e, "undo restore failed, record kept");
            self.records.push(record);
            return Err(e.into());
        }
        tracing::info!(path = %record.path, remaining = self.records.len(), "undo restored snapshot");
        Ok(record)
    }

    pub fn peek(&self) -> Option<&EditRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
