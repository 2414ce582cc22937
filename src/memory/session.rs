//! 会话记忆：文件内容 LRU + 最近对话窗口
//!
//! 文件数超过上限时淘汰最久未访问的条目；`get` 与 `put` 都会刷新访问顺序。

use std::collections::{HashMap, VecDeque};

use crate::memory::ConversationMemory;

#[derive(Clone, Debug)]
pub struct SessionMemory {
    files: HashMap<String, String>,
    /// 队首最久未访问，队尾最近访问
    access_order: VecDeque<String>,
    max_files: usize,
    pub conversation: ConversationMemory,
}

impl SessionMemory {
    pub fn new(max_files: usize, max_turns: usize) -> Self {
        Self {
            files: HashMap::new(),
            access_order: VecDeque::new(),
            max_files: max_files.max(1),
            conversation: ConversationMemory::new(max_turns),
        }
    }

    fn touch(&mut self, path: &str) {
        if let Some(pos) = self.access_order.iter().position(|p| p == path) {
            self.access_order.remove(pos);
        }
        self.access_order.push_back(path.to_string());
    }

    pub fn get(&mut self, path: &str) -> Option<&str> {
        if !self.files.contains_key(path) {
            return None;
        }
        self.touch(path);
        self.files.get(path).map(String::as_str)
    }

    /// 写入或覆盖；返回被淘汰的路径
    pub fn put(&mut self, path: &str, content: impl Into<String>) -> Vec<String> {
        self.files.insert(path.to_string(), content.into());
        self.touch(path);
        let mut evicted = Vec::new();
        while self.files.len() > self.max_files {
            match self.access_order.pop_front() {
                Some(oldest) => {
                    self.files.remove(&oldest);
                    tracing::debug!(path = %oldest, "session cache evicted");
                    evicted.push(oldest);
                }
                None => break,
            }
        }
        evicted
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        if let Some(pos) = self.access_order.iter().position(|p| p == path) {
            self.access_order.remove(pos);
        }
        self.files.remove(path)
    }

    /// 不刷新访问顺序的只读查看
    pub fn peek(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_never_exceeded_and_lru_evicted() {
        let mut session = SessionMemory::new(3, 10);
        session.put("a.py", "a");
        session.put("b.py", "b");
        session.put("c.py", "c");
        // a 被访问后 b 成为最久未访问
        assert_eq!(session.get("a.py"), Some("a"));
        let evicted = session.put("d.py", "d");
        assert_eq!(evicted, vec!["b.py".to_string()]);
        assert_eq!(session.len(), 3);
        assert!(session.contains("a.py"));
        assert!(!session.contains("b.py"));
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let mut session = SessionMemory::new(2, 10);
        session.put("a.py", "v1");
        session.put("a.py", "v2");
        assert_eq!(session.len(), 1);
        assert_eq!(session.peek("a.py"), Some("v2"));
    }

    #[test]
    fn test_many_inserts_stay_within_cap() {
        let mut session = SessionMemory::new(30, 10);
        for i in 0..100 {
            session.put(&format!("f{i}.py"), "x");
            assert!(session.len() <= 30);
        }
        assert!(session.contains("f99.py"));
        assert!(!session.contains("f69.py"));
        assert!(session.contains("f70.py"));
    }

    #[test]
    fn test_remove() {
        let mut session = SessionMemory::new(2, 10);
        session.put("a.py", "a");
        assert_eq!(session.remove("a.py"), Some("a".to_string()));
        assert!(session.is_empty());
        session.put("b.py", "b");
        session.put("c.py", "c");
        assert_eq!(session.len(), 2);
    }
}
