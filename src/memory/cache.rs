//! 响应缓存去重
//!
//! 键为 (content_hash, query_hash)。只有精确命中才直接返回缓存；写入时若同一 content_hash
//! 下已有 token 重叠率 ≥ 阈值的查询，则原地更新该条目而不是新增。超出容量淘汰时间戳最旧的条目。
//! 文件内容变化后旧 content_hash 的条目不再可达，由容量淘汰自然回收。

use std::collections::HashSet;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::memory::persistent::CacheEntry;

/// sha256 十六进制的前 16 位
pub fn short_hash(data: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(data.as_bytes()));
    digest.truncate(16);
    digest
}

/// 对一组 (路径, 内容) 计算内容哈希；与传入顺序无关
pub fn content_hash(files: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let joined: String = sorted
        .iter()
        .map(|(path, content)| format!("{path}:{content}"))
        .collect();
    short_hash(&joined)
}

/// 小写并折叠空白
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn query_hash(query: &str) -> String {
    short_hash(&normalize_query(query))
}

fn tokens(query: &str) -> HashSet<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// 共享 token 数 / 并集 token 数；两侧皆空时为 0
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

/// 一次写入的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CacheWrite {
    /// 新增条目；超出容量时附带被淘汰的条目
    Inserted { evicted: Option<CacheEntry> },
    /// 合并进近似条目
    Merged { similarity: f64 },
    /// 精确键已存在，覆盖响应
    Replaced,
}

#[derive(Debug, Clone)]
pub struct CacheDeduplicator {
    max_entries: usize,
    threshold: f64,
    max_response_chars: usize,
}

impl Default for CacheDeduplicator {
    fn default() -> Self {
        Self::new(500, 0.70, 5000)
    }
}

impl CacheDeduplicator {
    pub fn new(max_entries: usize, threshold: f64, max_response_chars: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            threshold,
            max_response_chars,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 精确查找
    pub fn lookup<'a>(
        &self,
        cache: &'a [CacheEntry],
        content_hash: &str,
        query: &str,
    ) -> Option<&'a CacheEntry> {
        let qh = query_hash(query);
        cache
            .iter()
            .find(|e| e.content_hash == content_hash && e.query_hash == qh)
    }

    /// 同一 content_hash 下相似度最高且达到阈值的条目
    pub fn find_similar(
        &self,
        cache: &[CacheEntry],
        content_hash: &str,
        query: &str,
    ) -> Option<(usize, f64)> {
        cache
            .iter()
            .enumerate()
            .filter(|(_, e)| e.content_hash == content_hash)
            .map(|(i, e)| (i, similarity(query, &e.query)))
            .filter(|(_, ratio)| *ratio >= self.threshold)
            .fold(None, |best: Option<(usize, f64)>, cur| match best {
                Some(b) if b.1 >= cur.1 => Some(b),
                _ => Some(cur),
            })
    }

    pub fn store(
        &self,
        cache: &mut Vec<CacheEntry>,
        content_hash: &str,
        query: &str,
        response: &str,
    ) -> CacheWrite {
        let response = super::conversation::truncate_chars(response, self.max_response_chars);
        let qh = query_hash(query);
        let now = Utc::now();

        if let Some(entry) = cache
            .iter_mut()
            .find(|e| e.content_hash == content_hash && e.query_hash == qh)
        {
            entry.response = response;
            entry.timestamp = now;
            return CacheWrite::Replaced;
        }

        if let Some((idx, ratio)) = self.find_similar(cache, content_hash, query) {
            // 原查询仍是精确键，只原地更新响应
            let entry = &mut cache[idx];
            entry.response = response;
            entry.timestamp = now;
            entry.merges += 1;
            entry.last_similarity = Some(ratio);
            tracing::debug!(similarity = ratio, "cache entry merged with near-duplicate query");
            return CacheWrite::Merged { similarity: ratio };
        }

        cache.push(CacheEntry {
            content_hash: content_hash.to_string(),
            query_hash: qh,
            query: query.to_string(),
            response,
            timestamp: now,
            merges: 0,
            last_similarity: None,
        });
        let evicted = if cache.len() > self.max_entries {
            cache
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.timestamp)
                .map(|(i, _)| i)
                .map(|i| cache.remove(i))
        } else {
            None
        };
        CacheWrite::Inserted { evicted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(content: &str) -> Vec<(String, String)> {
        vec![("a.py".to_string(), content.to_string())]
    }

    #[test]
    fn test_hash_shapes() {
        let h = content_hash(&files("x = 1\n"));
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(h, content_hash(&files("x = 2\n")));
        assert_eq!(query_hash("What  does MAIN do"), query_hash("what does main do"));
    }

    #[test]
    fn test_content_hash_ignores_order() {
        let a = vec![
            ("a.py".to_string(), "1".to_string()),
            ("b.py".to_string(), "2".to_string()),
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_similarity_is_jaccard() {
        assert_eq!(similarity("a b c d", "a b c d"), 1.0);
        assert_eq!(similarity("a b", "c d"), 0.0);
        // 3 共享 / 4 并集
        assert!((similarity("what does main do", "what does main") - 0.75).abs() < 1e-9);
        assert_eq!(similarity("", ""), 0.0);
    }

    #[test]
    fn test_exact_hit_only() {
        let dedup = CacheDeduplicator::default();
        let mut cache = Vec::new();
        let ch = content_hash(&files("x"));
        dedup.store(&mut cache, &ch, "what does main.py do", "it runs the app");
        assert_eq!(
            dedup.lookup(&cache, &ch, "What does  main.py do").map(|e| e.response.as_str()),
            Some("it runs the app")
        );
        assert!(dedup.lookup(&cache, &ch, "what does main.py do exactly").is_none());
        assert!(dedup.lookup(&cache, "other", "what does main.py do").is_none());
    }

    #[test]
    fn test_near_duplicate_merges_in_place() {
        let dedup = CacheDeduplicator::default();
        let mut cache = Vec::new();
        let ch = content_hash(&files("x"));
        dedup.store(&mut cache, &ch, "explain the main function in main.py", "v1");
        let write = dedup.store(&mut cache, &ch, "please explain the main function in main.py", "v2");
        assert!(matches!(write, CacheWrite::Merged { .. }));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache[0].response, "v2");
        assert_eq!(cache[0].merges, 1);
        assert_eq!(cache[0].query, "explain the main function in main.py");
    }

    #[test]
    fn test_merge_keeps_original_query_as_exact_key() {
        let dedup = CacheDeduplicator::default();
        let mut cache = Vec::new();
        let ch = content_hash(&files("x"));
        dedup.store(&mut cache, &ch, "explain the main function in main.py", "v1");
        dedup.store(&mut cache, &ch, "please explain the main function in main.py", "v2");
        assert_eq!(cache.len(), 1);
        assert_eq!(
            dedup
                .lookup(&cache, &ch, "explain the main function in main.py")
                .map(|e| e.response.as_str()),
            Some("v2")
        );
    }

    #[test]
    fn test_dissimilar_or_other_hash_inserts() {
        let dedup = CacheDeduplicator::default();
        let mut cache = Vec::new();
        dedup.store(&mut cache, "h1", "explain main", "v1");
        dedup.store(&mut cache, "h1", "list all routes", "v2");
        dedup.store(&mut cache, "h2", "explain main", "v3");
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_exact_key_replaced() {
        let dedup = CacheDeduplicator::default();
        let mut cache = Vec::new();
        dedup.store(&mut cache, "h1", "explain main", "v1");
        assert_eq!(dedup.store(&mut cache, "h1", "Explain main", "v2"), CacheWrite::Replaced);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache[0].response, "v2");
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let dedup = CacheDeduplicator::new(2, 0.7, 5000);
        let mut cache = Vec::new();
        dedup.store(&mut cache, "h1", "alpha", "1");
        dedup.store(&mut cache, "h1", "beta", "2");
        cache[0].timestamp -= chrono::Duration::seconds(10);
        let write = dedup.store(&mut cache, "h1", "gamma", "3");
        match write {
            CacheWrite::Inserted { evicted: Some(e) } => assert_eq!(e.query, "alpha"),
            other => panic!("expected eviction, got {:?}", other),
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_response_truncated() {
        let dedup = CacheDeduplicator::new(10, 0.7, 5);
        let mut cache = Vec::new();
        dedup.store(&mut cache, "h", "q", "0123456789");
        assert_eq!(cache[0].response, "01234");
    }
}
