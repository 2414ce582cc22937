//! 从用户语句中提取偏好
//!
//! 支持 `key = value` / `key: value`（可带 set / prefer 前缀），以及关于注释、docstring、
//! 类型标注的自然表述（always / never）。

use std::sync::OnceLock;

use regex::Regex;

static KV_RE: OnceLock<Regex> = OnceLock::new();

fn kv_pattern() -> &'static Regex {
    KV_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:set\s+|prefer\s+|preference\s+)?([a-z_][a-z0-9_.\-]*)\s*[=:]\s*(.+?)\s*$")
            .expect("valid preference regex")
    })
}

/// 整句是否为 `key = value` / `key: value` 形式
pub fn is_key_value(text: &str) -> bool {
    kv_pattern().is_match(text)
}

/// 返回识别出的 (key, value)；无法识别时为空
pub fn extract_preferences(text: &str) -> Vec<(String, String)> {
    if let Some(caps) = kv_pattern().captures(text) {
        return vec![(caps[1].to_lowercase(), caps[2].to_string())];
    }

    let lower = text.to_lowercase();
    let enabled = !(lower.contains("never") || lower.contains("don't") || lower.contains("do not"));
    let value = if enabled { "true" } else { "false" };
    let mut prefs = Vec::new();
    if lower.contains("comment") {
        prefs.push(("add_comments".to_string(), value.to_string()));
    }
    if lower.contains("docstring") {
        prefs.push(("add_docstrings".to_string(), value.to_string()));
    }
    if lower.contains("type") && lower.contains("hint") {
        prefs.push(("add_type_hints".to_string(), value.to_string()));
    }
    prefs
}
