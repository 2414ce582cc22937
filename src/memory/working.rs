//! 工作记忆：单轮内的临时状态
//!
//! 当前节点名、步数、重试次数、最近错误；轮次结束时清空。

#[derive(Clone, Debug, Default)]
pub struct WorkingMemory {
    pub node: Option<String>,
    pub step: usize,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进入一个节点，步数加一
    pub fn enter(&mut self, node: impl Into<String>) {
        self.node = Some(node.into());
        self.step += 1;
    }

    pub fn set_error(&mut self, err: impl Into<String>) {
        self.last_error = Some(err.into());
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_and_clear() {
        let mut wm = WorkingMemory::new();
        wm.enter("intent");
        wm.enter("edit");
        wm.retry_count = 2;
        wm.set_error("boom");
        assert_eq!(wm.node.as_deref(), Some("edit"));
        assert_eq!(wm.step, 2);
        wm.clear();
        assert!(wm.node.is_none());
        assert_eq!(wm.step, 0);
        assert_eq!(wm.retry_count, 0);
        assert!(wm.last_error.is_none());
    }
}
