//! Run execution: the step loop, retry wiring, and terminal bookkeeping.

mod orchestrator;

pub use orchestrator::Orchestrator;
