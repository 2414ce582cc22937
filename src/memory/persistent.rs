//! 持久记忆：单个带版本号的 JSON 记录
//!
//! 启动时加载：文件缺失视为空状态；内容损坏或版本不符时报告 `CacheCorruption`，
//! 由调用方重置为空状态。每次变更后整体重写（先写临时文件再 rename）。

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};

pub const RECORD_VERSION: u32 = 1;

/// 缓存条目：以 (content_hash, query_hash) 为键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: String,
    pub query_hash: String,
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    /// 被近似查询合并的次数
    #[serde(default)]
    pub merges: u32,
    /// 最近一次合并时的相似度
    #[serde(default)]
    pub last_similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub detail: String,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentRecord {
    pub version: u32,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub cache: Vec<CacheEntry>,
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub execution_log: VecDeque<ExecutionLogEntry>,
}

impl Default for PersistentRecord {
    fn default() -> Self {
        Self {
            version: RECORD_VERSION,
            preferences: BTreeMap::new(),
            cache: Vec::new(),
            file_hashes: BTreeMap::new(),
            execution_log: VecDeque::new(),
        }
    }
}

/// 磁盘上的持久记录及其路径
#[derive(Debug)]
pub struct PersistentStore {
    path: PathBuf,
    pub record: PersistentRecord,
    log_cap: usize,
}

impl PersistentStore {
    /// 读取记录；缺失返回空记录，损坏返回 `CacheCorruption`
    pub fn try_load(path: &Path) -> Result<PersistentRecord, AgentError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistentRecord::default())
            }
            Err(e) => {
                return Err(AgentError::CacheCorruption(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        };
        let record: PersistentRecord = serde_json::from_str(&raw)
            .map_err(|e| AgentError::CacheCorruption(format!("{}: {e}", path.display())))?;
        if record.version != RECORD_VERSION {
            return Err(AgentError::CacheCorruption(format!(
                "{}: unsupported version {}",
                path.display(),
                record.version
            )));
        }
        Ok(record)
    }

    /// 加载，永不失败：损坏交给恢复引擎，结果为重置时从空记录开始
    pub fn load(path: impl Into<PathBuf>, log_cap: usize) -> Self {
        let path = path.into();
        let record = match Self::try_load(&path) {
            Ok(record) => record,
            Err(err) => match RecoveryEngine::new().handle(&err, false) {
                RecoveryAction::ResetState => {
                    tracing::warn!(error = %err, "persistent memory unreadable, starting empty");
                    PersistentRecord::default()
                }
                other => {
                    tracing::warn!(error = %err, action = ?other, "persistent memory load failed");
                    PersistentRecord::default()
                }
            },
        };
        Self {
            path,
            record,
            log_cap,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 原子重写：临时文件 + rename
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.record)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }

    /// 追加执行日志，超出上限丢弃最旧条目
    pub fn push_log(&mut self, kind: &str, detail: &str, ok: bool) {
        self.record.execution_log.push_back(ExecutionLogEntry {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            detail: detail.to_string(),
            ok,
        });
        while self.record.execution_log.len() > self.log_cap {
            self.record.execution_log.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.record = PersistentRecord::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = PersistentStore::load(dir.path().join("memory.json"), 50);
        assert_eq!(store.record, PersistentRecord::default());
    }

    #[test]
    fn test_corrupt_file_reported_then_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PersistentStore::try_load(&path),
            Err(AgentError::CacheCorruption(_))
        ));
        let store = PersistentStore::load(&path, 50);
        assert!(store.record.cache.is_empty());
    }

    #[test]
    fn test_version_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, r#"{"version": 99}"#).unwrap();
        assert!(matches!(
            PersistentStore::try_load(&path),
            Err(AgentError::CacheCorruption(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/memory.json");
        let mut store = PersistentStore::load(&path, 50);
        store
            .record
            .preferences
            .insert("indent".to_string(), "4".to_string());
        store.push_log("edit", "a.py", true);
        store.save().unwrap();
        assert!(!dir.path().join("nested/memory.json.tmp").exists());

        let loaded = PersistentStore::load(&path, 50);
        assert_eq!(loaded.record.preferences.get("indent").map(String::as_str), Some("4"));
        assert_eq!(loaded.record.execution_log.len(), 1);
    }

    #[test]
    fn test_execution_log_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut store = PersistentStore::load(dir.path().join("m.json"), 3);
        for i in 0..5 {
            store.push_log("run", &format!("cmd{i}"), true);
        }
        let details: Vec<_> = store
            .record
            .execution_log
            .iter()
            .map(|e| e.detail.clone())
            .collect();
        assert_eq!(details, vec!["cmd2", "cmd3", "cmd4"]);
    }
}
