//! Engine error taxonomy.
//!
//! Non-terminal failures are retried transparently by the retry policy;
//! terminal failures set the run status and are broadcast with a
//! human-readable message.

use thiserror::Error;

use action_gate::GateError;
use action_locator::LocatorError;
use webpilot_core_types::UnknownActionError;

#[derive(Clone, Debug, Error)]
pub enum EngineError {
    /// Malformed step; failed fast, never dispatched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The resolver found nothing acceptable on the page.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The tool call threw, timed out, or returned a failure marker.
    #[error("protocol call failed: {0}")]
    Protocol(String),

    /// The call nominally succeeded but its post-condition did not hold.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// The external step source failed; guessing the next action is unsafe.
    #[error("step interpreter failed: {0}")]
    Interpreter(String),

    /// Remaining script text did not change across a successful iteration.
    #[error("infinite loop detected: remaining script did not advance at step {step_index}")]
    InfiniteLoopDetected { step_index: u32 },

    /// The hard step ceiling bounded the loop.
    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u32 },

    /// Cooperative cancellation; terminal but not an error state.
    #[error("run cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Failures the retry policy may attempt again under the same or a
    /// later strategy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ElementNotFound(_)
                | EngineError::Protocol(_)
                | EngineError::VerificationFailed(_)
        )
    }

    /// Failures that end the run regardless of step criticality.
    pub fn is_run_terminal(&self) -> bool {
        matches!(
            self,
            EngineError::Interpreter(_)
                | EngineError::InfiniteLoopDetected { .. }
                | EngineError::StepLimitExceeded { .. }
                | EngineError::Cancelled
        )
    }
}

impl From<UnknownActionError> for EngineError {
    fn from(err: UnknownActionError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<LocatorError> for EngineError {
    fn from(err: LocatorError) -> Self {
        match err {
            LocatorError::EmptyTarget => EngineError::Validation(err.to_string()),
            _ => EngineError::ElementNotFound(err.to_string()),
        }
    }
}

impl From<GateError> for EngineError {
    fn from(err: GateError) -> Self {
        EngineError::VerificationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON error: {err}"))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(EngineError::Protocol("x".into()).is_retryable());
        assert!(EngineError::ElementNotFound("x".into()).is_retryable());
        assert!(EngineError::VerificationFailed("x".into()).is_retryable());
        assert!(!EngineError::Validation("x".into()).is_retryable());
        assert!(!EngineError::Interpreter("x".into()).is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
    }

    #[test]
    fn terminal_classification() {
        assert!(EngineError::Interpreter("x".into()).is_run_terminal());
        assert!(EngineError::InfiniteLoopDetected { step_index: 3 }.is_run_terminal());
        assert!(EngineError::StepLimitExceeded { limit: 50 }.is_run_terminal());
        assert!(EngineError::Cancelled.is_run_terminal());
        assert!(!EngineError::Protocol("x".into()).is_run_terminal());
    }

    #[test]
    fn locator_errors_map_by_shape() {
        let err: EngineError = LocatorError::EmptyTarget.into();
        assert!(matches!(err, EngineError::Validation(_)));
        let err: EngineError = LocatorError::NoMatch {
            target: "login".into(),
        }
        .into();
        assert!(matches!(err, EngineError::ElementNotFound(_)));
    }
}
