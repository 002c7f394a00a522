//! Gate error types

use thiserror::Error;

/// A post-condition that did not hold. Advisory: the retry policy counts
/// these as failed attempts, they are never run-fatal by themselves.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("navigation landed on '{actual}' instead of a page under '{expected}'")]
    DomainMismatch { expected: String, actual: String },

    #[error("page appears unresponsive after the action (snapshot too small)")]
    PageUnresponsive,

    #[error("target element '{ref_id}' is gone from the post-action snapshot")]
    ElementMissing { ref_id: String },

    #[error("condition '{condition}' did not hold")]
    ConditionFailed { condition: String },

    #[error("verification needs {0} but none was captured")]
    MissingContext(&'static str),
}
