//! Expectation conditions.
//!
//! The step interpreter emits free-text conditions for `expect` steps.
//! The self-sufficient ones (no selector needed) are recognized here and
//! dispatched through [`crate::verifier::VerificationEngine`] rather than
//! being patched onto the protocol client at runtime.

use serde::{Deserialize, Serialize};

/// Recognized expectation conditions.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The page URL changed between the pre and post snapshots.
    UrlChanged,
    /// The page produced a non-trivial snapshot.
    PageLoaded,
    /// Some text or element is visible; checked against the protocol by the
    /// dispatched command, so the gate treats it as satisfied.
    Visible,
    /// Anything the gate does not understand; advisory pass-through.
    Other(String),
}

impl Condition {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "url changed" | "url_changed" | "urlchanged" => Condition::UrlChanged,
            "page loaded" | "page_loaded" | "loaded" => Condition::PageLoaded,
            "visible" | "is visible" | "shown" => Condition::Visible,
            _ => Condition::Other(normalized),
        }
    }

    /// Conditions that need no selector to be meaningful.
    pub fn is_self_sufficient(&self) -> bool {
        matches!(self, Condition::UrlChanged | Condition::PageLoaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_conditions() {
        assert_eq!(Condition::parse("URL changed"), Condition::UrlChanged);
        assert_eq!(Condition::parse("url_changed"), Condition::UrlChanged);
        assert_eq!(Condition::parse("page loaded"), Condition::PageLoaded);
        assert_eq!(Condition::parse("visible"), Condition::Visible);
    }

    #[test]
    fn unknown_condition_is_preserved() {
        match Condition::parse("cart count is 3") {
            Condition::Other(raw) => assert_eq!(raw, "cart count is 3"),
            other => panic!("unexpected condition: {other:?}"),
        }
    }

    #[test]
    fn self_sufficiency() {
        assert!(Condition::UrlChanged.is_self_sufficient());
        assert!(Condition::PageLoaded.is_self_sufficient());
        assert!(!Condition::Visible.is_self_sufficient());
        assert!(!Condition::Other("x".into()).is_self_sufficient());
    }
}
