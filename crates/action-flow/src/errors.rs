//! Flow error types

use thiserror::Error;

use crate::types::RetryAttempt;

#[derive(Debug, Error)]
pub enum FlowError {
    /// Every strategy ran out of attempts. Terminal for the step, not
    /// necessarily for the run; criticality decides that.
    #[error("step failed after {attempts} attempts across all strategies: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: String,
        history: Vec<RetryAttempt>,
    },

    /// A non-retryable error ended the step immediately.
    #[error("step aborted without retry: {reason}")]
    Aborted {
        reason: String,
        history: Vec<RetryAttempt>,
    },
}

impl FlowError {
    pub fn history(&self) -> &[RetryAttempt] {
        match self {
            FlowError::Exhausted { history, .. } | FlowError::Aborted { history, .. } => history,
        }
    }
}
