//! Per-action post-condition checks.

use tracing::{debug, warn};
use url::Url;

use webpilot_core_types::{ActionKind, PageSnapshot, ParsedStep};

use crate::conditions::Condition;
use crate::errors::GateError;

/// Combined text length below which a post-click snapshot is considered
/// evidence of a broken page. A weak heuristic kept until the protocol
/// offers native postconditions; tune with care.
pub const MIN_LIVE_TEXT: usize = 50;

/// Everything the gate may inspect about a completed attempt.
#[derive(Debug, Default)]
pub struct VerifyContext<'a> {
    pub pre_url: Option<&'a str>,
    pub post_url: Option<&'a str>,
    pub post_snapshot: Option<&'a PageSnapshot>,
    /// Element ref the dispatched command targeted, when it had one.
    pub resolved_ref: Option<&'a str>,
}

/// Checks that a dispatched command had its expected observable effect.
pub struct VerificationEngine {
    min_live_text: usize,
}

impl VerificationEngine {
    pub fn new() -> Self {
        Self {
            min_live_text: MIN_LIVE_TEXT,
        }
    }

    pub fn with_min_live_text(mut self, min_live_text: usize) -> Self {
        self.min_live_text = min_live_text;
        self
    }

    /// Verify one step against the post-action state. `Ok(())` means the
    /// post-condition held (or the action kind has no check).
    pub fn verify(&self, step: &ParsedStep, ctx: &VerifyContext<'_>) -> Result<(), GateError> {
        let verdict = match step.action {
            ActionKind::Navigate => self.verify_navigate(step, ctx),
            ActionKind::Click => self.verify_liveness(ctx),
            ActionKind::Fill | ActionKind::SelectOption => self.verify_element_present(ctx),
            ActionKind::Expect => self.verify_condition(step, ctx),
            // Hover, scroll, wait, screenshot have no observable
            // post-condition the snapshot can witness.
            _ => Ok(()),
        };

        match &verdict {
            Ok(()) => debug!(action = %step.action, "verification passed"),
            Err(err) => warn!(action = %step.action, error = %err, "verification failed"),
        }
        verdict
    }

    fn verify_navigate(&self, step: &ParsedStep, ctx: &VerifyContext<'_>) -> Result<(), GateError> {
        let target = step
            .url
            .as_deref()
            .ok_or(GateError::MissingContext("a target url"))?;
        let current = ctx
            .post_url
            .ok_or(GateError::MissingContext("the current page url"))?;

        let expected = domain_of(target).unwrap_or_else(|| target.to_string());
        let actual = domain_of(current).unwrap_or_else(|| current.to_string());

        // The landing domain must match the target, or be contained in it
        // (redirects onto a subdomain of the target are fine).
        if actual == expected || expected.contains(&actual) || actual.contains(&expected) {
            Ok(())
        } else {
            Err(GateError::DomainMismatch { expected, actual })
        }
    }

    fn verify_liveness(&self, ctx: &VerifyContext<'_>) -> Result<(), GateError> {
        let snapshot = ctx
            .post_snapshot
            .ok_or(GateError::MissingContext("a post-action snapshot"))?;
        if snapshot.combined_text_len() >= self.min_live_text {
            Ok(())
        } else {
            Err(GateError::PageUnresponsive)
        }
    }

    fn verify_element_present(&self, ctx: &VerifyContext<'_>) -> Result<(), GateError> {
        let snapshot = ctx
            .post_snapshot
            .ok_or(GateError::MissingContext("a post-action snapshot"))?;
        let ref_id = ctx
            .resolved_ref
            .ok_or(GateError::MissingContext("a resolved element ref"))?;
        if snapshot.contains_ref(ref_id) {
            Ok(())
        } else {
            Err(GateError::ElementMissing {
                ref_id: ref_id.to_string(),
            })
        }
    }

    fn verify_condition(&self, step: &ParsedStep, ctx: &VerifyContext<'_>) -> Result<(), GateError> {
        let raw = step.condition.as_deref().unwrap_or("visible");
        match Condition::parse(raw) {
            Condition::UrlChanged => {
                let post = ctx
                    .post_url
                    .ok_or(GateError::MissingContext("a post-action url"))?;
                match ctx.pre_url {
                    Some(pre) if pre == post => Err(GateError::ConditionFailed {
                        condition: "url changed".to_string(),
                    }),
                    // A session that had no url yet landing anywhere is a
                    // change.
                    _ => Ok(()),
                }
            }
            Condition::PageLoaded => self.verify_liveness(ctx),
            // The dispatched command already asked the protocol to check
            // visibility; if it came back clean, the condition held.
            Condition::Visible => Ok(()),
            Condition::Other(condition) => {
                debug!(condition, "no gate check for condition; passing through");
                Ok(())
            }
        }
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn domain_of(raw: &str) -> Option<String> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    Url::parse(&candidate)
        .ok()
        .and_then(|u| u.domain().map(|d| d.trim_start_matches("www.").to_lowercase()))
}
