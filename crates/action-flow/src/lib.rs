//! Retry and fallback policy for single-step execution.
//!
//! A step attempt only succeeds when both the protocol call and the
//! post-condition verification pass. Failures walk a state machine of
//! escalating strategies (standard, alternative, simple), each with a
//! bounded number of attempts and linear backoff. Whether an exhausted
//! step aborts the run is a criticality decision left to the caller.

pub mod errors;
pub mod policy;
pub mod types;

pub use errors::FlowError;
pub use policy::RetryPolicy;
pub use types::{AttemptOutcome, Criticality, ExecStrategy, FlowSuccess, RetryAttempt};
