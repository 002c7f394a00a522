//! webpilot: step-by-step browser-automation execution engine.
//!
//! A run takes a natural-language script, pulls one canonical step at a time
//! from a [`StepInterpreter`], maps it onto a protocol tool call, executes it
//! under an escalating retry policy, verifies the observable effect, and
//! advances. Progress is mirrored to a batched event bus.

pub mod command;
pub mod config;
pub mod errors;
pub mod interpreter;
pub mod protocol;
pub mod registry;
pub mod runner;
pub mod tools;

pub use command::{BuiltCommand, CommandBuilder, ResolutionMode};
pub use config::EngineConfig;
pub use errors::{EngineError, EngineResult};
pub use interpreter::{InterpreterReply, RuleBasedInterpreter, StepInterpreter};
pub use protocol::{NullClient, ProtocolClient, ProtocolResponse};
pub use registry::{RunHandle, RunRegistry};
pub use runner::Orchestrator;
