//! 短期记忆：对话历史
//!
//! `Message`/`Role` 是发给 LLM 的消息格式；`ConversationMemory` 保留最近 N 轮问答（有界队列），
//! 入队前做敏感信息脱敏，并判断某条回答是否值得持久化。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "api_key",
    "secret",
    "token",
    "credential",
    "private_key",
    "ssh_key",
    "bearer",
    "authorization",
];

pub const REDACTED: &str = "[REDACTED - contains sensitive info]";

const MAX_QUESTION_CHARS: usize = 300;
const MAX_ANSWER_CHARS: usize = 1000;

pub fn contains_sensitive(text: &str) -> bool {
    let lower = text.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// 低价值回答（短错误、找不到文件、超时）不进入执行日志
pub fn is_low_value(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    (answer.starts_with("Error:") && answer.chars().count() < 50)
        || answer.contains("No such file")
        || lower.contains("not found")
        || lower.contains("timeout")
        || lower.contains("timed out")
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// 一轮问答
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// 最近 N 轮对话，超出时丢弃最旧的一轮
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    /// 记录一轮问答；任一侧含敏感词时两侧都替换为占位文本
    pub fn push(&mut self, question: &str, answer: &str) {
        let (question, answer) = if contains_sensitive(question) || contains_sensitive(answer) {
            (REDACTED.to_string(), REDACTED.to_string())
        } else {
            (
                truncate_chars(question, MAX_QUESTION_CHARS),
                truncate_chars(answer, MAX_ANSWER_CHARS),
            )
        };
        self.turns.push_back(ConversationTurn {
            question,
            answer,
            timestamp: Utc::now(),
        });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// 最近 n 轮（按时间先后）
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(n))
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_window_keeps_latest() {
        let mut conv = ConversationMemory::new(10);
        for i in 0..15 {
            conv.push(&format!("q{i}"), &format!("a{i}"));
        }
        assert_eq!(conv.len(), 10);
        assert_eq!(conv.turns().next().unwrap().question, "q5");
        let recent: Vec<_> = conv.recent(3).map(|t| t.question.clone()).collect();
        assert_eq!(recent, vec!["q12", "q13", "q14"]);
    }

    #[test]
    fn test_sensitive_turn_is_redacted() {
        let mut conv = ConversationMemory::new(10);
        conv.push("what is my API_KEY?", "it's sk-123");
        let turn = conv.turns().next().unwrap();
        assert_eq!(turn.question, REDACTED);
        assert_eq!(turn.answer, REDACTED);
    }

    #[test]
    fn test_low_value_answers() {
        assert!(is_low_value("Error: boom"));
        assert!(is_low_value("File not found: a.py"));
        assert!(is_low_value("command timed out"));
        assert!(!is_low_value("main.py defines the FastAPI app and mounts two routers."));
    }

    #[test]
    fn test_long_answer_truncated_on_char_boundary() {
        let mut conv = ConversationMemory::new(2);
        conv.push("q", &"é".repeat(2000));
        assert_eq!(conv.turns().next().unwrap().answer.chars().count(), 1000);
    }
}
