//! Canonical-action to provider-tool mapping.
//!
//! The closed set of canonical actions maps onto the automation protocol's
//! tool names, each with an explicit required-argument contract. No
//! invocation is dispatched unless its arguments satisfy the contract.

use serde_json::{Map, Value};

use webpilot_core_types::ActionKind;

use crate::errors::{EngineError, EngineResult};

/// Provider tool name for a canonical action. Exhaustive over the closed
/// action set; an unknown action cannot reach this table because
/// [`ActionKind`] parsing already rejects it.
pub fn provider_tool(action: ActionKind) -> &'static str {
    match action {
        ActionKind::Navigate => "browser_navigate",
        ActionKind::Click => "browser_click",
        ActionKind::Fill => "browser_type",
        ActionKind::Wait => "browser_wait_for",
        ActionKind::Expect => "browser_verify",
        ActionKind::Hover => "browser_hover",
        ActionKind::Scroll => "browser_scroll",
        ActionKind::Screenshot => "browser_take_screenshot",
        ActionKind::SelectOption => "browser_select_option",
    }
}

/// Required argument keys per provider tool.
pub fn required_args(tool: &str) -> Option<&'static [&'static str]> {
    Some(match tool {
        "browser_navigate" => &["url"],
        "browser_click" => &["element", "ref"],
        "browser_type" => &["element", "ref", "text"],
        "browser_wait_for" => &["time"],
        "browser_verify" => &["condition"],
        "browser_hover" => &["element", "ref"],
        "browser_scroll" => &["direction"],
        "browser_take_screenshot" => &[],
        "browser_select_option" => &["element", "ref", "values"],
        _ => return None,
    })
}

/// Check an argument map against a tool's contract. Fails fast on unknown
/// tools, missing keys, and present-but-empty strings where the argument
/// carries the action's payload.
pub fn validate_arguments(tool: &str, args: &Map<String, Value>) -> EngineResult<()> {
    let required = required_args(tool)
        .ok_or_else(|| EngineError::Validation(format!("unknown provider tool '{tool}'")))?;

    for key in required {
        let value = args.get(*key).ok_or_else(|| {
            EngineError::Validation(format!("tool '{tool}' requires argument '{key}'"))
        })?;
        if value.is_null() {
            return Err(EngineError::Validation(format!(
                "tool '{tool}' argument '{key}' must not be null"
            )));
        }
    }

    // Typed steps must not be dispatched with nothing to type.
    if tool == "browser_type" {
        let empty = args
            .get("text")
            .and_then(|v| v.as_str())
            .map(|s| s.is_empty())
            .unwrap_or(true);
        if empty {
            return Err(EngineError::Validation(
                "tool 'browser_type' requires non-empty 'text'".to_string(),
            ));
        }
    }

    Ok(())
}
