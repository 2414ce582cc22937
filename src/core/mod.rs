//! 核心编排层：错误与恢复、阶段状态机、验证、重试控制、主控编排器与组装

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod state;
pub mod verifier;

pub use builder::{create_llm_from_config, AgentBuilder};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{Orchestrator, OrchestratorStats, TurnOutcome};
pub use recovery::RecoveryEngine;
pub use retry::{RetryController, RetryDecision};
pub use state::{Phase, SessionState};
pub use verifier::{VerificationResult, Verifier};
