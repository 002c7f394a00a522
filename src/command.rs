//! Turns a canonical step into a validated protocol invocation.
//!
//! All validation happens here, before any network round-trip: a malformed
//! step never produces a `CommandInvocation`.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;
use url::Url;

use action_gate::Condition;
use action_locator::ElementResolver;
use webpilot_core_types::{
    ActionKind, CommandInvocation, ElementMatch, PageSnapshot, ParsedStep,
};

use crate::errors::{EngineError, EngineResult};
use crate::tools;

/// How the target element is chosen for element-bearing actions. The retry
/// policy escalates through these.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolutionMode {
    /// Use the step as resolved: selector when present, else description.
    AsResolved,
    /// Ignore any prior selector and match on the description alone.
    DescriptionOnly,
    /// Substitute the first available element of the action's expected role.
    FirstOfRole,
}

/// A validated invocation plus the element ref it targets, kept for
/// post-condition verification.
#[derive(Clone, Debug)]
pub struct BuiltCommand {
    pub invocation: CommandInvocation,
    pub resolved_ref: Option<String>,
}

pub struct CommandBuilder {
    resolver: Arc<dyn ElementResolver>,
    default_wait_ms: u64,
}

impl CommandBuilder {
    pub fn new(resolver: Arc<dyn ElementResolver>, default_wait_ms: u64) -> Self {
        Self {
            resolver,
            default_wait_ms,
        }
    }

    /// Build with standard resolution.
    pub fn build(
        &self,
        step: &ParsedStep,
        snapshot: Option<&PageSnapshot>,
    ) -> EngineResult<BuiltCommand> {
        self.build_with_mode(step, snapshot, ResolutionMode::AsResolved)
    }

    pub fn build_with_mode(
        &self,
        step: &ParsedStep,
        snapshot: Option<&PageSnapshot>,
        mode: ResolutionMode,
    ) -> EngineResult<BuiltCommand> {
        let tool = tools::provider_tool(step.action);
        let mut invocation = CommandInvocation::new(tool);
        let mut resolved_ref = None;

        match step.action {
            ActionKind::Navigate => {
                let url = normalize_url(step.url.as_deref().unwrap_or_default())?;
                invocation = invocation.with_arg("url", json!(url));
            }
            ActionKind::Click | ActionKind::Hover => {
                let found = self.resolve_element(step, snapshot, mode)?;
                invocation = invocation
                    .with_arg("element", json!(element_label(step, &found)))
                    .with_arg("ref", json!(found.ref_id));
                resolved_ref = Some(found.ref_id);
            }
            ActionKind::Fill => {
                let text = step
                    .value
                    .as_deref()
                    .or(step.text.as_deref())
                    .unwrap_or_default();
                if text.is_empty() {
                    return Err(EngineError::Validation(
                        "fill step has no text to type".to_string(),
                    ));
                }
                let found = self.resolve_element(step, snapshot, mode)?;
                invocation = invocation
                    .with_arg("element", json!(element_label(step, &found)))
                    .with_arg("ref", json!(found.ref_id))
                    .with_arg("text", json!(text));
                resolved_ref = Some(found.ref_id);
            }
            ActionKind::SelectOption => {
                let value = step.value.as_deref().unwrap_or_default();
                if value.is_empty() {
                    return Err(EngineError::Validation(
                        "select step has no option value".to_string(),
                    ));
                }
                let found = self.resolve_element(step, snapshot, mode)?;
                invocation = invocation
                    .with_arg("element", json!(element_label(step, &found)))
                    .with_arg("ref", json!(found.ref_id))
                    .with_arg("values", json!([value]));
                resolved_ref = Some(found.ref_id);
            }
            ActionKind::Wait => {
                let timeout = step
                    .timeout_ms
                    .or_else(|| parse_digits(&step.description))
                    .unwrap_or(self.default_wait_ms);
                invocation = invocation.with_arg("time", json!(timeout));
            }
            ActionKind::Expect => {
                let condition_raw = step.condition.as_deref().unwrap_or_default();
                if condition_raw.trim().is_empty() {
                    return Err(EngineError::Validation(
                        "expect step has an empty condition".to_string(),
                    ));
                }
                let condition = Condition::parse(condition_raw);
                let subject = step.text.as_deref().or(step.selector.as_deref());
                if !condition.is_self_sufficient() && subject.is_none() {
                    return Err(EngineError::Validation(format!(
                        "expect condition '{condition_raw}' needs a selector or target text"
                    )));
                }
                invocation = invocation.with_arg("condition", json!(condition_raw));
                if let Some(subject) = subject {
                    invocation = invocation.with_arg("text", json!(subject));
                }
            }
            ActionKind::Scroll => {
                let direction = step.value.as_deref().unwrap_or("down");
                invocation = invocation.with_arg("direction", json!(direction));
            }
            ActionKind::Screenshot => {}
        }

        tools::validate_arguments(&invocation.tool_name, &invocation.arguments)?;
        debug!(tool = %invocation.tool_name, "command built");
        Ok(BuiltCommand {
            invocation,
            resolved_ref,
        })
    }

    fn resolve_element(
        &self,
        step: &ParsedStep,
        snapshot: Option<&PageSnapshot>,
        mode: ResolutionMode,
    ) -> EngineResult<ElementMatch> {
        // A selector that already carries a protocol ref skips resolution.
        if mode == ResolutionMode::AsResolved {
            if let Some(ref_id) = explicit_ref(step.selector.as_deref()) {
                return Ok(ElementMatch {
                    ref_id,
                    matched_text: step.description.clone(),
                    score: 0,
                });
            }
        }

        let snapshot = snapshot.ok_or_else(|| {
            EngineError::ElementNotFound("no page snapshot available for resolution".to_string())
        })?;

        match mode {
            ResolutionMode::AsResolved => Ok(self.resolver.resolve(step.target(), snapshot)?),
            ResolutionMode::DescriptionOnly => {
                Ok(self.resolver.resolve(&step.description, snapshot)?)
            }
            ResolutionMode::FirstOfRole => {
                let role = expected_role(step.action);
                self.resolver.first_of_role(snapshot, role).ok_or_else(|| {
                    EngineError::ElementNotFound(format!("no {role} available on the page"))
                })
            }
        }
    }
}

/// Human-readable element label sent alongside the ref, preferring the
/// matched on-page text over the step's own phrasing.
fn element_label(step: &ParsedStep, found: &ElementMatch) -> String {
    if found.matched_text.trim().is_empty() {
        step.description.clone()
    } else {
        found.matched_text.clone()
    }
}

/// Expected role per action for the last-resort substitution.
fn expected_role(action: ActionKind) -> &'static str {
    match action {
        ActionKind::Fill => "textbox",
        ActionKind::SelectOption => "combobox",
        _ => "button",
    }
}

/// Recognize selectors that already carry a protocol ref (`ref=e13`).
fn explicit_ref(selector: Option<&str>) -> Option<String> {
    let selector = selector?.trim();
    selector
        .strip_prefix("ref=")
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

/// Validate and normalize a navigation target, auto-prefixing a scheme.
fn normalize_url(raw: &str) -> EngineResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(
            "navigate step has no url".to_string(),
        ));
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = Url::parse(&candidate)
        .map_err(|e| EngineError::Validation(format!("invalid url '{trimmed}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(EngineError::Validation(format!(
            "unsupported url scheme '{}'",
            parsed.scheme()
        )));
    }
    Ok(parsed.to_string())
}

fn parse_digits(text: &str) -> Option<u64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_locator::KeywordResolver;
    use webpilot_core_types::PageElement;

    fn builder() -> CommandBuilder {
        CommandBuilder::new(Arc::new(KeywordResolver::new()), 3000)
    }

    fn login_snapshot() -> PageSnapshot {
        PageSnapshot::new(
            1,
            vec![
                PageElement::new("e1", "textbox", "").with_attr("placeholder", "Email"),
                PageElement::new("e2", "button", "Login"),
            ],
        )
    }

    fn step(action: ActionKind, description: &str) -> ParsedStep {
        ParsedStep::new(action, description, 0)
    }

    #[test]
    fn navigate_auto_prefixes_scheme() {
        let mut s = step(ActionKind::Navigate, "go to example");
        s.url = Some("example.com/welcome".to_string());
        let built = builder().build(&s, None).unwrap();
        assert_eq!(built.invocation.tool_name, "browser_navigate");
        assert_eq!(
            built.invocation.str_arg("url"),
            Some("https://example.com/welcome")
        );
    }

    #[test]
    fn navigate_without_url_fails_fast() {
        let s = step(ActionKind::Navigate, "go somewhere");
        let err = builder().build(&s, None).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn navigate_rejects_non_http_scheme() {
        let mut s = step(ActionKind::Navigate, "open mail");
        s.url = Some("ftp://example.com".to_string());
        assert!(builder().build(&s, None).is_err());
    }

    #[test]
    fn click_resolves_element_from_snapshot() {
        let built = builder()
            .build(&step(ActionKind::Click, "the Login button"), Some(&login_snapshot()))
            .unwrap();
        assert_eq!(built.invocation.tool_name, "browser_click");
        assert_eq!(built.invocation.str_arg("ref"), Some("e2"));
        assert_eq!(built.resolved_ref.as_deref(), Some("e2"));
    }

    #[test]
    fn explicit_ref_selector_skips_resolution() {
        let mut s = step(ActionKind::Click, "the Login button");
        s.selector = Some("ref=e42".to_string());
        let built = builder().build(&s, None).unwrap();
        assert_eq!(built.invocation.str_arg("ref"), Some("e42"));
    }

    #[test]
    fn fill_without_value_is_rejected_before_resolution() {
        let s = step(ActionKind::Fill, "the Email field");
        let err = builder().build(&s, Some(&login_snapshot())).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn fill_carries_text_and_ref() {
        let mut s = step(ActionKind::Fill, "the Email field");
        s.value = Some("user@example.com".to_string());
        let built = builder().build(&s, Some(&login_snapshot())).unwrap();
        assert_eq!(built.invocation.tool_name, "browser_type");
        assert_eq!(built.invocation.str_arg("ref"), Some("e1"));
        assert_eq!(built.invocation.str_arg("text"), Some("user@example.com"));
    }

    #[test]
    fn element_action_without_snapshot_is_not_found() {
        let err = builder()
            .build(&step(ActionKind::Click, "the Login button"), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::ElementNotFound(_)));
    }

    #[test]
    fn wait_defaults_when_unparsable() {
        let built = builder().build(&step(ActionKind::Wait, "wait a moment"), None).unwrap();
        assert_eq!(
            built.invocation.arguments.get("time").and_then(|v| v.as_u64()),
            Some(3000)
        );
    }

    #[test]
    fn wait_prefers_explicit_timeout() {
        let mut s = step(ActionKind::Wait, "wait");
        s.timeout_ms = Some(1500);
        let built = builder().build(&s, None).unwrap();
        assert_eq!(
            built.invocation.arguments.get("time").and_then(|v| v.as_u64()),
            Some(1500)
        );
    }

    #[test]
    fn expect_requires_condition() {
        let s = step(ActionKind::Expect, "the page shows Welcome");
        let err = builder().build(&s, None).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn expect_url_changed_is_self_sufficient() {
        let mut s = step(ActionKind::Expect, "the url changed");
        s.condition = Some("url changed".to_string());
        let built = builder().build(&s, None).unwrap();
        assert_eq!(built.invocation.tool_name, "browser_verify");
        assert_eq!(built.invocation.str_arg("condition"), Some("url changed"));
    }

    #[test]
    fn expect_visible_needs_a_subject() {
        let mut s = step(ActionKind::Expect, "something is visible");
        s.condition = Some("visible".to_string());
        assert!(builder().build(&s, None).is_err());

        s.text = Some("Welcome".to_string());
        let built = builder().build(&s, None).unwrap();
        assert_eq!(built.invocation.str_arg("text"), Some("Welcome"));
    }

    #[test]
    fn first_of_role_mode_substitutes_expected_role() {
        let mut s = step(ActionKind::Fill, "the mystery field");
        s.value = Some("x".to_string());
        let built = builder()
            .build_with_mode(&s, Some(&login_snapshot()), ResolutionMode::FirstOfRole)
            .unwrap();
        assert_eq!(built.invocation.str_arg("ref"), Some("e1"));
    }
}
