//! Shared primitives for the webpilot execution engine.
//!
//! Everything here is wire-adjacent: parsed steps come from the step
//! interpreter, invocations go out to the automation protocol, and run
//! records are mirrored to progress observers. All types derive serde.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a single execution run.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run lifecycle states.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Error | RunStatus::Cancelled
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity carried on run log entries and progress events.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One entry in a run's ordered log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl RunLogEntry {
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Immutable input to a run: ordered natural-language step lines plus an
/// optional assertions block executed after the step loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestScript {
    pub steps_text: String,
    #[serde(default)]
    pub assertions_text: Option<String>,
}

impl TestScript {
    pub fn new(steps_text: impl Into<String>) -> Self {
        Self {
            steps_text: steps_text.into(),
            assertions_text: None,
        }
    }

    pub fn with_assertions(mut self, assertions: impl Into<String>) -> Self {
        self.assertions_text = Some(assertions.into());
        self
    }
}

/// Mutable record of a single run. One run owns one exclusive automation
/// session; the record is never shared across runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: RunId,
    pub status: RunStatus,
    pub remaining_steps_text: String,
    pub step_index: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub logs: Vec<RunLogEntry>,
    /// Human-readable reason recorded when the run ends in a failure state.
    #[serde(default)]
    pub failure: Option<String>,
}

impl ExecutionRun {
    pub fn queued(id: RunId, script: &TestScript) -> Self {
        Self {
            id,
            status: RunStatus::Queued,
            remaining_steps_text: script.steps_text.trim().to_string(),
            step_index: 0,
            started_at: None,
            ended_at: None,
            logs: Vec::new(),
            failure: None,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Closed set of canonical automation verbs, independent of any concrete
/// protocol's tool naming. Unknown verbs never pass through silently; see
/// [`ActionKind::parse`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    Fill,
    Wait,
    Expect,
    Hover,
    Scroll,
    Screenshot,
    SelectOption,
}

/// Raised when a step names a verb outside the closed canonical set.
#[derive(Debug, Error)]
#[error("unknown canonical action '{0}'")]
pub struct UnknownActionError(pub String);

impl ActionKind {
    /// Parse a canonical-action string. `type` and `input` are accepted as
    /// aliases for `fill`; anything else is rejected.
    pub fn parse(value: &str) -> Result<Self, UnknownActionError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => Ok(ActionKind::Navigate),
            "click" => Ok(ActionKind::Click),
            "fill" | "type" | "input" => Ok(ActionKind::Fill),
            "wait" => Ok(ActionKind::Wait),
            "expect" | "assert" => Ok(ActionKind::Expect),
            "hover" => Ok(ActionKind::Hover),
            "scroll" => Ok(ActionKind::Scroll),
            "screenshot" => Ok(ActionKind::Screenshot),
            "select_option" | "select" => Ok(ActionKind::SelectOption),
            other => Err(UnknownActionError(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Wait => "wait",
            ActionKind::Expect => "expect",
            ActionKind::Hover => "hover",
            ActionKind::Scroll => "scroll",
            ActionKind::Screenshot => "screenshot",
            ActionKind::SelectOption => "select_option",
        }
    }

    /// Actions that target a concrete on-page element.
    pub fn targets_element(&self) -> bool {
        matches!(
            self,
            ActionKind::Click | ActionKind::Fill | ActionKind::Hover | ActionKind::SelectOption
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One canonical step produced by the external interpreter. Consumed once
/// by the command builder, then discarded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParsedStep {
    pub action: ActionKind,
    #[serde(default)]
    pub selector: Option<String>,
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    pub order: u32,
}

impl ParsedStep {
    pub fn new(action: ActionKind, description: impl Into<String>, order: u32) -> Self {
        Self {
            action,
            selector: None,
            description: description.into(),
            url: None,
            value: None,
            text: None,
            condition: None,
            timeout_ms: None,
            order,
        }
    }

    /// The string used to locate the step's target element: explicit
    /// selector when present, otherwise the free-text description.
    pub fn target(&self) -> &str {
        self.selector.as_deref().unwrap_or(&self.description)
    }
}

/// One interactive element enumerated from a page snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageElement {
    /// Stable protocol reference id, valid until the next navigation.
    pub ref_id: String,
    pub role: String,
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl PageElement {
    pub fn new(ref_id: impl Into<String>, role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            role: role.into(),
            text: text.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Point-in-time enumeration of interactive page elements. Refreshed after
/// every state-changing action; the version increases monotonically within
/// one automation session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub version: u64,
    pub elements: Vec<PageElement>,
}

impl PageSnapshot {
    pub fn new(version: u64, elements: Vec<PageElement>) -> Self {
        Self { version, elements }
    }

    /// Total visible-text length across all elements. Used by the liveness
    /// heuristics in the verification gate.
    pub fn combined_text_len(&self) -> usize {
        self.elements.iter().map(|e| e.text.chars().count()).sum()
    }

    pub fn contains_ref(&self, ref_id: &str) -> bool {
        self.elements.iter().any(|e| e.ref_id == ref_id)
    }
}

/// Resolver output: the element chosen for a target description.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementMatch {
    pub ref_id: String,
    pub matched_text: String,
    pub score: i64,
}

/// The unit sent to the automation protocol: a provider tool name plus a
/// JSON argument map already validated against the tool's contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub tool_name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl CommandInvocation {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: serde_json::Map::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parse_accepts_aliases() {
        assert_eq!(ActionKind::parse("type").unwrap(), ActionKind::Fill);
        assert_eq!(ActionKind::parse("input").unwrap(), ActionKind::Fill);
        assert_eq!(ActionKind::parse("NAVIGATE").unwrap(), ActionKind::Navigate);
        assert_eq!(ActionKind::parse("select").unwrap(), ActionKind::SelectOption);
    }

    #[test]
    fn action_parse_rejects_unknown() {
        let err = ActionKind::parse("teleport").unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn run_duration_requires_both_timestamps() {
        let run = ExecutionRun::queued(RunId::new(), &TestScript::new("Click login"));
        assert!(run.duration_ms().is_none());
    }

    #[test]
    fn step_target_prefers_selector() {
        let mut step = ParsedStep::new(ActionKind::Click, "the Login button", 0);
        assert_eq!(step.target(), "the Login button");
        step.selector = Some("#login".to_string());
        assert_eq!(step.target(), "#login");
    }

    #[test]
    fn snapshot_text_len_and_ref_lookup() {
        let snapshot = PageSnapshot::new(
            1,
            vec![
                PageElement::new("e1", "button", "Login"),
                PageElement::new("e2", "textbox", "Email"),
            ],
        );
        assert_eq!(snapshot.combined_text_len(), 10);
        assert!(snapshot.contains_ref("e2"));
        assert!(!snapshot.contains_ref("e3"));
    }
}
