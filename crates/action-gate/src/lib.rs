//! Post-condition verification for dispatched automation actions.
//!
//! A command invocation that nominally succeeded may still have had no
//! effect. The gate checks the post-action state per action kind; its
//! verdicts are advisory and feed the retry policy as failed attempts.

pub mod conditions;
pub mod errors;
pub mod verifier;

pub use conditions::Condition;
pub use errors::GateError;
pub use verifier::{VerificationEngine, VerifyContext, MIN_LIVE_TEXT};
