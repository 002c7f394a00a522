//! Core types for the retry state machine

use serde::{Deserialize, Serialize};

use webpilot_core_types::ActionKind;

/// Escalating execution strategies for a single step.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStrategy {
    /// Execute the step exactly as resolved.
    Standard,
    /// Re-resolve the target with a looser pass (description only, any
    /// prior selector ignored).
    Alternative,
    /// Substitute the first available element of the expected role.
    Simple,
}

impl ExecStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ExecStrategy::Standard => "standard",
            ExecStrategy::Alternative => "alternative",
            ExecStrategy::Simple => "simple",
        }
    }

    /// All strategies in escalation order.
    pub fn chain() -> [ExecStrategy; 3] {
        [
            ExecStrategy::Standard,
            ExecStrategy::Alternative,
            ExecStrategy::Simple,
        ]
    }
}

/// Whether a step failure aborts the run or only logs a warning.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    NonCritical,
}

impl Criticality {
    /// Navigation and clicks gate everything that follows them; other
    /// actions can fail without making the rest of the script meaningless.
    pub fn of(action: ActionKind) -> Self {
        match action {
            ActionKind::Navigate | ActionKind::Click => Criticality::Critical,
            _ => Criticality::NonCritical,
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Criticality::Critical)
    }
}

/// Outcome of one attempt, kept for policy decisions and logging only.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failed,
}

/// Ephemeral record of a single attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub strategy: ExecStrategy,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    #[serde(default)]
    pub error: Option<String>,
}

/// Successful step execution together with how it was reached.
#[derive(Clone, Debug)]
pub struct FlowSuccess<T> {
    pub value: T,
    pub strategy: ExecStrategy,
    pub attempts: u32,
    pub history: Vec<RetryAttempt>,
}
