//! 分层记忆管理器
//!
//! 统一持有工作记忆、会话记忆与持久记录：文件内容缓存与内容哈希、回答缓存（经去重器）、
//! 偏好、执行日志，以及为 LLM 构建带字符预算的上下文。所有持久层变更之后立即重写记录。

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::MemorySection;
use crate::memory::cache::{self, CacheDeduplicator, CacheWrite};
use crate::memory::conversation::{contains_sensitive, is_low_value, truncate_chars};
use crate::memory::persistent::{ExecutionLogEntry, PersistentRecord, PersistentStore};
use crate::memory::{SessionMemory, WorkingMemory};

/// 压缩时保留的结构行前缀
const SKELETON_PREFIXES: &[&str] = &[
    "import", "from", "def", "async def", "class", "fn ", "pub fn", "async fn", "pub async fn",
    "struct", "pub struct", "impl", "use ",
];

/// 剩余预算低于此值时不再追加文件
const MIN_FILE_BUDGET: usize = 1000;

#[derive(Debug)]
pub struct MemoryManager {
    pub working: WorkingMemory,
    pub session: SessionMemory,
    store: PersistentStore,
    dedup: CacheDeduplicator,
    context_max_chars: usize,
}

impl MemoryManager {
    pub fn new(path: impl Into<PathBuf>, cfg: &MemorySection) -> Self {
        Self {
            working: WorkingMemory::new(),
            session: SessionMemory::new(cfg.session_max_files, cfg.conversation_turns),
            store: PersistentStore::load(path, cfg.execution_log_cap),
            dedup: CacheDeduplicator::new(
                cfg.cache_max_entries,
                cfg.similarity_threshold,
                cfg.max_response_chars,
            ),
            context_max_chars: cfg.context_max_chars,
        }
    }

    pub fn record(&self) -> &PersistentRecord {
        &self.store.record
    }

    /// 重写持久记录；失败只告警，不中断当前轮次
    pub fn persist(&self) {
        if let Err(e) = self.store.save() {
            tracing::warn!(path = %self.store.path().display(), error = %e, "could not save persistent memory");
        }
    }

    /// 清空持久记录（用于损坏恢复）
    pub fn reset_persistent(&mut self) {
        self.store.reset();
        self.persist();
    }

    /// 会话层读取（刷新访问顺序）
    pub fn cached_file(&mut self, path: &str) -> Option<String> {
        self.session.get(path).map(str::to_string)
    }

    /// 写入会话层并刷新文件哈希；哈希变化意味着旧内容上的缓存条目从此不可达
    pub fn remember_file(&mut self, path: &str, content: &str) {
        self.session.put(path, content);
        let hash = cache::short_hash(content);
        let changed = self
            .store
            .record
            .file_hashes
            .get(path)
            .map_or(true, |old| *old != hash);
        if changed {
            if self.store.record.file_hashes.contains_key(path) {
                tracing::debug!(path, "file content changed, cached answers for old content orphaned");
            }
            self.store.record.file_hashes.insert(path.to_string(), hash);
            self.persist();
        }
    }

    pub fn file_hash(&self, path: &str) -> Option<&str> {
        self.store.record.file_hashes.get(path).map(String::as_str)
    }

    /// 精确命中的缓存回答
    pub fn cached_answer(&self, files: &[(String, String)], query: &str) -> Option<String> {
        let content_hash = cache::content_hash(files);
        self.dedup
            .lookup(&self.store.record.cache, &content_hash, query)
            .map(|e| e.response.clone())
    }

    pub fn store_answer(&mut self, files: &[(String, String)], query: &str, response: &str) -> CacheWrite {
        let content_hash = cache::content_hash(files);
        let write = self
            .dedup
            .store(&mut self.store.record.cache, &content_hash, query, response);
        self.persist();
        write
    }

    pub fn cache_len(&self) -> usize {
        self.store.record.cache.len()
    }

    pub fn set_preference(&mut self, key: &str, value: &str) {
        self.store
            .record
            .preferences
            .insert(key.to_string(), value.to_string());
        self.persist();
    }

    pub fn preferences(&self) -> &BTreeMap<String, String> {
        &self.store.record.preferences
    }

    /// 拼入 prompt 的偏好段落
    pub fn preferences_section(&self) -> String {
        if self.store.record.preferences.is_empty() {
            return String::new();
        }
        let mut s = String::from("## User preferences\n");
        for (k, v) in &self.store.record.preferences {
            s.push_str(&format!("- {k}: {v}\n"));
        }
        s
    }

    /// 记一轮问答：会话窗口总是记录（已脱敏），执行日志只记有价值且不含敏感信息的
    pub fn add_conversation(&mut self, question: &str, answer: &str) {
        self.session.conversation.push(question, answer);
        if !is_low_value(answer) && !contains_sensitive(question) && !contains_sensitive(answer) {
            self.log_execution("answer", &truncate_chars(question, 200), true);
        }
    }

    pub fn log_execution(&mut self, kind: &str, detail: &str, ok: bool) {
        self.store.push_log(kind, detail, ok);
        self.persist();
    }

    pub fn execution_log(&self) -> impl Iterator<Item = &ExecutionLogEntry> {
        self.store.record.execution_log.iter()
    }

    /// 最近 n 轮对话的纯文本（用于从测试失败输出中找文件）
    pub fn recent_conversation_text(&self, n: usize) -> String {
        self.session
            .conversation
            .recent(n)
            .map(|t| format!("Q: {}\nA: {}", t.question, t.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 构建上下文：最近 3 轮对话 + 文件内容；超出预算的文件压缩为结构骨架
    pub fn build_context(&self, files: &[(String, String)]) -> String {
        let mut parts = Vec::new();
        let mut total = 0usize;

        if !self.session.conversation.is_empty() {
            let conv = self
                .session
                .conversation
                .recent(3)
                .map(|t| format!("Q: {}\nA: {}...", t.question, truncate_chars(&t.answer, 200)))
                .collect::<Vec<_>>()
                .join("\n");
            total += conv.len();
            parts.push(format!("# Recent Conversation (last 3 interactions)\n{conv}"));
        }

        for (path, content) in files {
            if content.is_empty() {
                continue;
            }
            let available = self.context_max_chars.saturating_sub(total);
            if available < MIN_FILE_BUDGET {
                break;
            }
            let body = if content.len() > available {
                compress_to_skeleton(content, available)
            } else {
                content.clone()
            };
            total += body.len();
            parts.push(format!("# {path}\n{body}"));
        }

        parts.join("\n\n")
    }

    pub fn end_turn(&mut self) {
        self.working.clear();
    }
}

/// 只保留 import / def / class / fn 等结构行，直到占满预算的 80%
pub fn compress_to_skeleton(content: &str, budget: usize) -> String {
    let limit = budget * 4 / 5;
    let lines: Vec<&str> = content.lines().collect();
    let mut kept: Vec<&str> = Vec::new();
    let mut size = 0usize;
    for line in &lines {
        let trimmed = line.trim_start();
        if SKELETON_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
            if size + line.len() + 1 > limit {
                break;
            }
            size += line.len() + 1;
            kept.push(line);
        }
    }
    format!(
        "{}\n# ... (truncated {} lines)",
        kept.join("\n"),
        lines.len() - kept.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> MemoryManager {
        MemoryManager::new(dir.path().join("memory.json"), &MemorySection::default())
    }

    fn files(content: &str) -> Vec<(String, String)> {
        vec![("a.py".to_string(), content.to_string())]
    }

    #[test]
    fn test_answer_cache_survives_reload() {
        let dir = TempDir::new().unwrap();
        {
            let mut mm = manager(&dir);
            mm.store_answer(&files("x = 1\n"), "what is x", "x is one");
        }
        let mm = manager(&dir);
        assert_eq!(
            mm.cached_answer(&files("x = 1\n"), "what is x").as_deref(),
            Some("x is one")
        );
    }

    #[test]
    fn test_content_change_misses_once_then_hits() {
        let dir = TempDir::new().unwrap();
        let mut mm = manager(&dir);
        mm.remember_file("a.py", "x = 1\n");
        mm.store_answer(&files("x = 1\n"), "what is x", "one");
        let old_hash = mm.file_hash("a.py").unwrap().to_string();

        mm.remember_file("a.py", "x = 2\n");
        assert_ne!(mm.file_hash("a.py").unwrap(), old_hash);
        assert!(mm.cached_answer(&files("x = 2\n"), "what is x").is_none());
        mm.store_answer(&files("x = 2\n"), "what is x", "two");
        assert_eq!(
            mm.cached_answer(&files("x = 2\n"), "what is x").as_deref(),
            Some("two")
        );
        // 旧条目只是不可达，并未被主动删除
        assert_eq!(mm.cache_len(), 2);
    }

    #[test]
    fn test_preferences_persisted_and_rendered() {
        let dir = TempDir::new().unwrap();
        {
            let mut mm = manager(&dir);
            mm.set_preference("indent", "4");
        }
        let mm = manager(&dir);
        assert_eq!(mm.preferences().get("indent").map(String::as_str), Some("4"));
        assert!(mm.preferences_section().contains("- indent: 4"));
    }

    #[test]
    fn test_conversation_filtering() {
        let dir = TempDir::new().unwrap();
        let mut mm = manager(&dir);
        mm.add_conversation("where is config", "File not found: config.py");
        mm.add_conversation("my password is hunter2", "noted");
        mm.add_conversation("what does main do", "It starts the server.");
        assert_eq!(mm.session.conversation.len(), 3);
        let logged: Vec<_> = mm.execution_log().map(|e| e.detail.clone()).collect();
        assert_eq!(logged, vec!["what does main do"]);
    }

    #[test]
    fn test_context_budget_compresses_large_file() {
        let dir = TempDir::new().unwrap();
        let cfg = MemorySection {
            context_max_chars: 2000,
            ..MemorySection::default()
        };
        let mm = MemoryManager::new(dir.path().join("m.json"), &cfg);
        let mut big = String::from("import os\n");
        for i in 0..200 {
            big.push_str(&format!("def f{i}():\n    return {i}\n"));
        }
        let ctx = mm.build_context(&[("big.py".to_string(), big)]);
        assert!(ctx.starts_with("# big.py\nimport os\ndef f0():"));
        assert!(ctx.contains("# ... (truncated"));
        assert!(!ctx.contains("return 0"));
        assert!(ctx.len() < 2000);
    }

    #[test]
    fn test_end_turn_clears_working() {
        let dir = TempDir::new().unwrap();
        let mut mm = manager(&dir);
        mm.working.enter("edit");
        mm.end_turn();
        assert!(mm.working.node.is_none());
    }
}
