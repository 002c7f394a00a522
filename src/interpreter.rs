//! Step interpreter contract and the built-in rule-based implementation.
//!
//! The engine never parses natural language itself: it asks an interpreter
//! for the next canonical step plus the remaining script text, one step at
//! a time. The LLM-backed interpreter lives behind [`StepInterpreter`]
//! outside this crate; [`RuleBasedInterpreter`] is the deterministic
//! implementation used by the CLI default path and the test suite.

use async_trait::async_trait;
use tracing::debug;

use webpilot_core_types::{ActionKind, PageSnapshot, ParsedStep, RunId};

use crate::errors::{EngineError, EngineResult};

/// One interpreter answer: the parsed step and what is left of the script.
#[derive(Clone, Debug)]
pub struct InterpreterReply {
    pub step: ParsedStep,
    pub remaining_text: String,
}

/// External step source. Failures are run-terminal: when the interpreter
/// cannot produce a step, guessing one is unsafe.
#[async_trait]
pub trait StepInterpreter: Send + Sync {
    /// Convert the first remaining instruction into a canonical step and
    /// report the script text that remains after it.
    async fn next_step(
        &self,
        remaining: &str,
        snapshot: Option<&PageSnapshot>,
        run_id: &RunId,
    ) -> EngineResult<InterpreterReply>;

    /// Parse the whole assertions block in one batch.
    async fn assertions(
        &self,
        text: &str,
        snapshot: Option<&PageSnapshot>,
        run_id: &RunId,
    ) -> EngineResult<Vec<ParsedStep>>;
}

/// Deterministic line-based interpreter: one instruction per line, keyword
/// dispatch per action kind.
pub struct RuleBasedInterpreter;

#[async_trait]
impl StepInterpreter for RuleBasedInterpreter {
    async fn next_step(
        &self,
        remaining: &str,
        _snapshot: Option<&PageSnapshot>,
        run_id: &RunId,
    ) -> EngineResult<InterpreterReply> {
        let mut lines = remaining.lines();
        let line = loop {
            match lines.next() {
                Some(candidate) if !candidate.trim().is_empty() => break candidate.trim(),
                Some(_) => continue,
                None => {
                    return Err(EngineError::Interpreter(
                        "no instruction left in the remaining script".to_string(),
                    ))
                }
            }
        };

        let step = parse_instruction(line, 0)?;
        let remaining_text = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        debug!(run = %run_id, action = %step.action, "interpreted instruction");

        Ok(InterpreterReply {
            step,
            remaining_text,
        })
    }

    async fn assertions(
        &self,
        text: &str,
        _snapshot: Option<&PageSnapshot>,
        run_id: &RunId,
    ) -> EngineResult<Vec<ParsedStep>> {
        let mut steps = Vec::new();
        for (index, line) in text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .enumerate()
        {
            steps.push(parse_assertion(line, index as u32));
        }
        debug!(run = %run_id, assertions = steps.len(), "interpreted assertion block");
        Ok(steps)
    }
}

/// Parse one instruction line into a canonical step.
fn parse_instruction(line: &str, order: u32) -> EngineResult<ParsedStep> {
    let lower = line.to_lowercase();

    if lower.starts_with("navigate")
        || lower.starts_with("go to")
        || lower.starts_with("goto")
        || lower.starts_with("open ")
        || lower.starts_with("visit ")
    {
        let mut step = ParsedStep::new(ActionKind::Navigate, line, order);
        step.url = extract_url(line);
        return Ok(step);
    }

    if let Some(rest) = keyword_tail(line, &["click on", "click"]) {
        let mut step = ParsedStep::new(ActionKind::Click, strip_article(rest), order);
        step.selector = None;
        return Ok(step);
    }

    if lower.starts_with("fill")
        || lower.starts_with("type")
        || lower.starts_with("input")
        || lower.starts_with("enter ")
    {
        return Ok(parse_fill(line, order));
    }

    if lower.starts_with("wait") {
        let mut step = ParsedStep::new(ActionKind::Wait, line, order);
        step.timeout_ms = extract_duration_ms(&lower);
        return Ok(step);
    }

    if let Some(rest) = keyword_tail(line, &["hover over", "hover"]) {
        return Ok(ParsedStep::new(ActionKind::Hover, strip_article(rest), order));
    }

    if lower.starts_with("scroll") {
        let mut step = ParsedStep::new(ActionKind::Scroll, line, order);
        step.value = Some(if lower.contains("up") { "up" } else { "down" }.to_string());
        return Ok(step);
    }

    if lower.contains("screenshot") {
        return Ok(ParsedStep::new(ActionKind::Screenshot, line, order));
    }

    if lower.starts_with("select") {
        return Ok(parse_select(line, order));
    }

    if lower.starts_with("expect")
        || lower.starts_with("assert")
        || lower.starts_with("verify")
        || lower.contains("should")
    {
        return Ok(parse_assertion(line, order));
    }

    Err(EngineError::Interpreter(format!(
        "could not derive a canonical action from '{line}'"
    )))
}

/// Parse one assertion line. Assertion lines always become `expect` steps;
/// the condition defaults to visibility unless the line names a
/// self-sufficient condition.
fn parse_assertion(line: &str, order: u32) -> ParsedStep {
    let lower = line.to_lowercase();
    let mut step = ParsedStep::new(ActionKind::Expect, line, order);

    if lower.contains("url chang") {
        step.condition = Some("url changed".to_string());
        return step;
    }
    if lower.contains("page load") {
        step.condition = Some("page loaded".to_string());
        return step;
    }

    step.condition = Some("visible".to_string());
    let subject = ["shows", "contains", "displays", "should see", "see"]
        .into_iter()
        .find_map(|kw| keyword_tail(line, &[kw]))
        .map(strip_article)
        .unwrap_or_else(|| line.to_string());
    step.text = extract_quoted(line).or(Some(subject.clone()));
    step.selector = Some(subject);
    step
}

fn parse_fill(line: &str, order: u32) -> ParsedStep {
    let mut step = ParsedStep::new(ActionKind::Fill, line, order);
    step.value = extract_quoted(line);

    // "Fill <value> into <target>" / "Type <value> in <target>".
    for sep in [" into ", " in ", " on "] {
        if let Some(pos) = find_ignore_ascii_case(line, sep) {
            let target = strip_article(line[pos + sep.len()..].trim().to_string());
            if !target.is_empty() {
                step.description = target;
            }
            if step.value.is_none() {
                let head = &line[..pos];
                let value = head
                    .split_whitespace()
                    .skip(1)
                    .collect::<Vec<_>>()
                    .join(" ");
                if !value.is_empty() {
                    step.value = Some(value);
                }
            }
            break;
        }
    }
    step
}

fn parse_select(line: &str, order: u32) -> ParsedStep {
    let mut step = ParsedStep::new(ActionKind::SelectOption, line, order);
    step.value = extract_quoted(line);

    if let Some(pos) = find_ignore_ascii_case(line, " from ") {
        let target = strip_article(line[pos + 6..].trim().to_string());
        if !target.is_empty() {
            step.description = target;
        }
        if step.value.is_none() {
            let head = &line[..pos];
            let value = head
                .split_whitespace()
                .skip(1)
                .collect::<Vec<_>>()
                .join(" ");
            if !value.is_empty() {
                step.value = Some(value);
            }
        }
    }
    step
}

/// Tail of the line after the first matching keyword, matched without
/// regard to ASCII case.
fn keyword_tail(line: &str, keywords: &[&str]) -> Option<String> {
    for keyword in keywords {
        if let Some(pos) = find_ignore_ascii_case(line, keyword) {
            let tail = line[pos + keyword.len()..].trim();
            if !tail.is_empty() {
                return Some(tail.to_string());
            }
        }
    }
    None
}

/// Byte offset of `needle` within `haystack`, ignoring ASCII case. An
/// offset found in a `to_lowercase()` copy must never be used to slice
/// the original: lowercasing can change byte lengths (`İ` grows from two
/// bytes to three), which would put the offset mid-character.
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&pos| {
        haystack.is_char_boundary(pos)
            && haystack.is_char_boundary(pos + needle.len())
            && haystack[pos..pos + needle.len()].eq_ignore_ascii_case(needle)
    })
}

fn strip_article(text: String) -> String {
    let trimmed = text.trim();
    for article in ["the ", "a ", "an ", "on "] {
        if let Some(head) = trimmed.get(..article.len()) {
            if head.eq_ignore_ascii_case(article) {
                return trimmed[article.len()..].trim().to_string();
            }
        }
    }
    trimmed.to_string()
}

fn extract_quoted(line: &str) -> Option<String> {
    for quote in ['"', '\''] {
        if let Some(start) = line.find(quote) {
            let rest = &line[start + 1..];
            if let Some(end) = rest.find(quote) {
                let inner = rest[..end].trim();
                if !inner.is_empty() {
                    return Some(inner.to_string());
                }
            }
        }
    }
    None
}

fn extract_url(line: &str) -> Option<String> {
    line.split_whitespace()
        .map(|token| token.trim_end_matches(['.', ',', ';', ')']))
        .find(|token| token.contains("://") || (token.contains('.') && !token.ends_with('.')))
        .map(|token| token.to_string())
}

/// Pull a duration out of free text. Bare small numbers are read as
/// seconds, larger ones as milliseconds.
fn extract_duration_ms(lower: &str) -> Option<u64> {
    let digits: String = lower
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let value: u64 = digits.parse().ok()?;

    if lower.contains("ms") || lower.contains("millisecond") {
        Some(value)
    } else if lower.contains("second") || lower.contains("sec") {
        Some(value.saturating_mul(1000))
    } else if value < 100 {
        Some(value.saturating_mul(1000))
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_id() -> RunId {
        RunId::new()
    }

    #[tokio::test]
    async fn next_step_consumes_exactly_one_line() {
        let interpreter = RuleBasedInterpreter;
        let script = "Navigate to https://x.test\nClick the Login button";
        let reply = interpreter
            .next_step(script, None, &run_id())
            .await
            .unwrap();
        assert_eq!(reply.step.action, ActionKind::Navigate);
        assert_eq!(reply.step.url.as_deref(), Some("https://x.test"));
        assert_eq!(reply.remaining_text, "Click the Login button");

        let reply = interpreter
            .next_step(&reply.remaining_text, None, &run_id())
            .await
            .unwrap();
        assert_eq!(reply.step.action, ActionKind::Click);
        assert_eq!(reply.step.description, "Login button");
        assert!(reply.remaining_text.is_empty());
    }

    #[tokio::test]
    async fn empty_script_is_an_interpreter_error() {
        let err = RuleBasedInterpreter
            .next_step("   \n  ", None, &run_id())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Interpreter(_)));
    }

    #[test]
    fn fill_extracts_value_and_target() {
        let step = parse_instruction("Fill \"user@example.com\" into the Email field", 0).unwrap();
        assert_eq!(step.action, ActionKind::Fill);
        assert_eq!(step.value.as_deref(), Some("user@example.com"));
        assert_eq!(step.description, "Email field");
    }

    #[test]
    fn fill_without_quotes_takes_head_words() {
        let step = parse_instruction("Type hello world in the search box", 0).unwrap();
        assert_eq!(step.value.as_deref(), Some("hello world"));
        assert_eq!(step.description, "search box");
    }

    #[test]
    fn wait_parses_units() {
        assert_eq!(
            parse_instruction("Wait 2 seconds", 0).unwrap().timeout_ms,
            Some(2000)
        );
        assert_eq!(
            parse_instruction("Wait 500ms", 0).unwrap().timeout_ms,
            Some(500)
        );
        assert_eq!(
            parse_instruction("Wait for 3", 0).unwrap().timeout_ms,
            Some(3000)
        );
        assert_eq!(parse_instruction("Wait", 0).unwrap().timeout_ms, None);
    }

    #[test]
    fn scroll_direction_defaults_down() {
        assert_eq!(
            parse_instruction("Scroll to the bottom", 0)
                .unwrap()
                .value
                .as_deref(),
            Some("down")
        );
        assert_eq!(
            parse_instruction("Scroll up a bit", 0).unwrap().value.as_deref(),
            Some("up")
        );
    }

    #[test]
    fn select_extracts_value_and_target() {
        let step = parse_instruction("Select \"Germany\" from the Country dropdown", 0).unwrap();
        assert_eq!(step.action, ActionKind::SelectOption);
        assert_eq!(step.value.as_deref(), Some("Germany"));
        assert_eq!(step.description, "Country dropdown");
    }

    #[test]
    fn non_ascii_instructions_parse_without_panicking() {
        let step = parse_instruction("Type İ into Ämt", 0).unwrap();
        assert_eq!(step.action, ActionKind::Fill);
        assert_eq!(step.value.as_deref(), Some("İ"));
        assert_eq!(step.description, "Ämt");

        let step = parse_instruction("Click the Länder Übersicht", 0).unwrap();
        assert_eq!(step.action, ActionKind::Click);
        assert_eq!(step.description, "Länder Übersicht");

        let step = parse_instruction("Select \"Österreich\" from the Länder dropdown", 0).unwrap();
        assert_eq!(step.value.as_deref(), Some("Österreich"));
        assert_eq!(step.description, "Länder dropdown");
    }

    #[test]
    fn wait_duration_saturates_on_huge_values() {
        let step = parse_instruction("Wait 18446744073709551615 seconds", 0).unwrap();
        assert_eq!(step.timeout_ms, Some(u64::MAX));
    }

    #[test]
    fn unknown_instruction_is_rejected() {
        assert!(parse_instruction("Teleport to the moon", 0).is_err());
    }

    #[tokio::test]
    async fn assertion_block_parses_in_one_batch() {
        let steps = RuleBasedInterpreter
            .assertions(
                "the page shows Welcome\nthe url changed",
                None,
                &run_id(),
            )
            .await
            .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action, ActionKind::Expect);
        assert_eq!(steps[0].condition.as_deref(), Some("visible"));
        assert_eq!(steps[0].text.as_deref(), Some("Welcome"));
        assert_eq!(steps[1].condition.as_deref(), Some("url changed"));
    }
}
