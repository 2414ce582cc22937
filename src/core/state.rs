//! 编排状态：阶段与合法迁移、每轮的会话状态
//!
//! 迁移表是唯一的约束来源：`Phase::can_transition` 之外的跳转一律报 `InvalidTransition`。
//! 「应用之后验证」是 Executing → Verifying 这条迁移本身，不借助额外标志位。

use serde::Serialize;

use crate::core::AgentError;
use crate::core::verifier::VerificationResult;
use crate::edit::EditPlan;
use crate::llm::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Routed,
    AwaitingApproval,
    Executing,
    Verifying,
    Retrying,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Routed => "routed",
            Phase::AwaitingApproval => "awaiting_approval",
            Phase::Executing => "executing",
            Phase::Verifying => "verifying",
            Phase::Retrying => "retrying",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    pub fn can_transition(self, to: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, to),
            (Idle, Routed)
                | (Routed, AwaitingApproval)
                | (Routed, Executing)
                | (Routed, Failed)
                // 新指令替换待审批计划 / 用户拒绝
                | (AwaitingApproval, Routed)
                | (AwaitingApproval, Executing)
                | (AwaitingApproval, Done)
                | (Executing, Verifying)
                | (Executing, Done)
                | (Executing, Failed)
                | (Verifying, Done)
                | (Verifying, Retrying)
                | (Verifying, Failed)
                | (Retrying, Routed)
                | (Retrying, Failed)
                | (Done, Idle)
                | (Failed, Idle)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 每轮的会话状态；撤销栈由编排器持有，跨轮保留
#[derive(Debug)]
pub struct SessionState {
    phase: Phase,
    pub intent: Option<Intent>,
    pub target_files: Vec<String>,
    /// 至多一个待审批 / 执行中的计划
    pub pending_plan: Option<EditPlan>,
    /// 产生待审批计划的原始指令（自动修复时复用）
    pub instruction: Option<String>,
    pub retry_count: u32,
    pub last_verification: Option<VerificationResult>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            intent: None,
            target_files: Vec::new(),
            pending_plan: None,
            instruction: None,
            retry_count: 0,
            last_verification: None,
        }
    }
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn awaiting_approval(&self) -> bool {
        self.phase == Phase::AwaitingApproval
    }

    pub fn transition(&mut self, to: Phase) -> Result<(), AgentError> {
        if !self.phase.can_transition(to) {
            return Err(AgentError::InvalidTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(from = %self.phase, to = %to, "phase transition");
        self.phase = to;
        Ok(())
    }

    /// 轮次结束：从 Done / Failed 回到 Idle，清掉本轮字段
    pub fn finish(&mut self) -> Result<(), AgentError> {
        self.transition(Phase::Idle)?;
        *self = Self::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_edit_transitions() {
        let mut s = SessionState::default();
        for to in [
            Phase::Routed,
            Phase::AwaitingApproval,
            Phase::Executing,
            Phase::Verifying,
            Phase::Retrying,
            Phase::Routed,
            Phase::Executing,
            Phase::Verifying,
            Phase::Done,
            Phase::Idle,
        ] {
            s.transition(to).unwrap();
        }
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut s = SessionState::default();
        let err = s.transition(Phase::Executing).unwrap_err();
        match err {
            AgentError::InvalidTransition { from, to } => {
                assert_eq!(from, "idle");
                assert_eq!(to, "executing");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn test_no_skip_from_approval_to_verifying() {
        assert!(!Phase::AwaitingApproval.can_transition(Phase::Verifying));
        assert!(!Phase::Executing.can_transition(Phase::Routed));
        assert!(Phase::AwaitingApproval.can_transition(Phase::Routed));
    }

    #[test]
    fn test_finish_clears_turn_fields() {
        let mut s = SessionState::default();
        s.transition(Phase::Routed).unwrap();
        s.retry_count = 2;
        s.target_files.push("a.py".to_string());
        assert!(s.finish().is_err());
        s.transition(Phase::Failed).unwrap();
        s.finish().unwrap();
        assert_eq!(s.phase(), Phase::Idle);
        assert_eq!(s.retry_count, 0);
        assert!(s.target_files.is_empty());
    }
}
