//! 自动修复的次数与停滞控制
//!
//! 一个周期从用户批准的首次应用开始（记为第 1 次尝试），之后每次验证失败可再规划一次，
//! 直到达到上限。失败信息单调累积并全部提供给下一次规划；新计划与上一次完全相同则判定停滞。

use crate::core::AgentError;
use crate::edit::EditPlan;

/// 一次验证失败之后的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 可以进行第 `next_attempt` 次尝试
    Retry { next_attempt: u32 },
    Exhausted,
}

#[derive(Debug)]
pub struct RetryController {
    max_attempts: u32,
    attempts: u32,
    failures: Vec<String>,
    last_plan: Option<EditPlan>,
}

impl RetryController {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: 0,
            failures: Vec::new(),
            last_plan: None,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn last_failure(&self) -> &str {
        self.failures.last().map(String::as_str).unwrap_or("")
    }

    /// 成功、取消或新指令时清零
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.failures.clear();
        self.last_plan = None;
    }

    /// 登记一次即将应用的计划，返回其尝试序号
    pub fn start_attempt(&mut self, plan: &EditPlan) -> Result<u32, AgentError> {
        if self.attempts >= self.max_attempts {
            return Err(self.exhausted());
        }
        if self.last_plan.as_ref() == Some(plan) {
            tracing::warn!(attempts = self.attempts, "planner repeated the previous plan");
            return Err(AgentError::RetryStalled {
                attempts: self.attempts,
                last_failure: self.last_failure().to_string(),
            });
        }
        self.attempts += 1;
        self.last_plan = Some(plan.clone());
        Ok(self.attempts)
    }

    pub fn record_failure(&mut self, message: impl Into<String>) -> RetryDecision {
        self.failures.push(message.into());
        if self.attempts >= self.max_attempts {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry {
                next_attempt: self.attempts + 1,
            }
        }
    }

    pub fn exhausted(&self) -> AgentError {
        AgentError::RetryExhausted {
            attempts: self.attempts,
            last_failure: self.last_failure().to_string(),
        }
    }
}

/// 规划上下文中的失败段落（按发生顺序全部列出）
pub fn failures_section(failures: &[String]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let mut s = String::from("## Previous attempts failed\n");
    for (i, f) in failures.iter().enumerate() {
        s.push_str(&format!("### Attempt {}\n{}\n", i + 1, f));
    }
    s
}
