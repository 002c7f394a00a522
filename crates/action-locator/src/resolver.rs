//! Weighted element scoring over page snapshots.

use tracing::{debug, trace};

use webpilot_core_types::{ElementMatch, PageElement, PageSnapshot};

use crate::errors::LocatorError;
use crate::keywords::{extract_keywords, Keyword};

/// Score contribution weights, summed across all extracted keywords.
const EXACT_TEXT: i64 = 100;
const EXACT_PLACEHOLDER: i64 = 80;
const EXACT_NAME: i64 = 60;
const CONTAINS_TEXT: i64 = 40;
const CONTAINS_PLACEHOLDER: i64 = 30;
const CONTAINS_NAME: i64 = 20;

/// Minimum similarity ratio (0..=100 scale) accepted by the fallback pass
/// when keyword scoring yields nothing.
pub const DEFAULT_MIN_SIMILARITY: i64 = 30;

/// Resolves a target description or selector to a concrete snapshot element.
pub trait ElementResolver: Send + Sync {
    /// Best match for the target, or an error when nothing is acceptable.
    fn resolve(&self, target: &str, snapshot: &PageSnapshot)
        -> Result<ElementMatch, LocatorError>;

    /// First element of the given role in snapshot order. Used as the
    /// last-resort substitution by the retry policy's "simple" strategy.
    fn first_of_role(&self, snapshot: &PageSnapshot, role: &str) -> Option<ElementMatch>;
}

/// Default resolver: keyword scoring with a character-similarity fallback.
pub struct KeywordResolver {
    min_similarity: i64,
}

impl KeywordResolver {
    pub fn new() -> Self {
        Self {
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    pub fn with_min_similarity(mut self, min_similarity: i64) -> Self {
        self.min_similarity = min_similarity;
        self
    }
}

impl Default for KeywordResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementResolver for KeywordResolver {
    fn resolve(
        &self,
        target: &str,
        snapshot: &PageSnapshot,
    ) -> Result<ElementMatch, LocatorError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(LocatorError::EmptyTarget);
        }
        if snapshot.elements.is_empty() {
            return Err(LocatorError::EmptySnapshot);
        }

        let keywords = extract_keywords(target);
        debug!(target, keywords = keywords.len(), "resolving element");

        // Strict > keeps the first element in snapshot order on ties.
        let mut best: Option<(&PageElement, i64)> = None;
        for element in &snapshot.elements {
            let score = score_element(element, &keywords);
            trace!(ref_id = %element.ref_id, score, "scored candidate");
            if score > best.map(|(_, s)| s).unwrap_or(0) {
                best = Some((element, score));
            }
        }

        if let Some((element, score)) = best {
            return Ok(ElementMatch {
                ref_id: element.ref_id.clone(),
                matched_text: element.text.clone(),
                score,
            });
        }

        // Nothing scored above zero: fall back to whole-string similarity
        // against each element's composite text.
        let mut fallback: Option<(&PageElement, i64)> = None;
        for element in &snapshot.elements {
            let ratio = similarity_ratio(&target.to_lowercase(), &composite_text(element));
            if ratio > fallback.map(|(_, r)| r).unwrap_or(self.min_similarity - 1) {
                fallback = Some((element, ratio));
            }
        }

        match fallback {
            Some((element, ratio)) => {
                debug!(ref_id = %element.ref_id, ratio, "similarity fallback accepted");
                Ok(ElementMatch {
                    ref_id: element.ref_id.clone(),
                    matched_text: element.text.clone(),
                    score: ratio,
                })
            }
            None => Err(LocatorError::NoMatch {
                target: target.to_string(),
            }),
        }
    }

    fn first_of_role(&self, snapshot: &PageSnapshot, role: &str) -> Option<ElementMatch> {
        snapshot
            .elements
            .iter()
            .find(|e| e.role.eq_ignore_ascii_case(role))
            .map(|e| ElementMatch {
                ref_id: e.ref_id.clone(),
                matched_text: e.text.clone(),
                score: 0,
            })
    }
}

fn score_element(element: &PageElement, keywords: &[Keyword]) -> i64 {
    let text = element.text.trim().to_lowercase();
    let placeholder = element
        .attr("placeholder")
        .map(|v| v.trim().to_lowercase())
        .unwrap_or_default();
    let name = element
        .attr("name")
        .map(|v| v.trim().to_lowercase())
        .unwrap_or_default();

    let mut score = 0;
    for keyword in keywords {
        let kw = keyword.value();
        if !text.is_empty() {
            if text == kw {
                score += EXACT_TEXT;
            } else if text.contains(kw) {
                score += CONTAINS_TEXT;
            }
        }
        if !placeholder.is_empty() {
            if placeholder == kw {
                score += EXACT_PLACEHOLDER;
            } else if placeholder.contains(kw) {
                score += CONTAINS_PLACEHOLDER;
            }
        }
        if !name.is_empty() {
            if name == kw {
                score += EXACT_NAME;
            } else if name.contains(kw) {
                score += CONTAINS_NAME;
            }
        }
    }
    score
}

fn composite_text(element: &PageElement) -> String {
    let mut parts = vec![element.text.as_str()];
    if let Some(placeholder) = element.attr("placeholder") {
        parts.push(placeholder);
    }
    if let Some(name) = element.attr("name") {
        parts.push(name);
    }
    parts.join(" ").to_lowercase()
}

/// Character-bigram similarity between two strings on a 0..=100 scale
/// (Sørensen–Dice over bigram multisets).
fn similarity_ratio(a: &str, b: &str) -> i64 {
    let a_grams = bigrams(a);
    let b_grams = bigrams(b);
    if a_grams.is_empty() || b_grams.is_empty() {
        return 0;
    }

    let mut remaining = b_grams.clone();
    let mut overlap = 0usize;
    for gram in &a_grams {
        if let Some(pos) = remaining.iter().position(|g| g == gram) {
            remaining.swap_remove(pos);
            overlap += 1;
        }
    }

    ((2 * overlap * 100) / (a_grams.len() + b_grams.len())) as i64
}

fn bigrams(s: &str) -> Vec<[char; 2]> {
    let chars: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
    chars.windows(2).map(|w| [w[0], w[1]]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use webpilot_core_types::PageElement;

    fn snapshot(elements: Vec<PageElement>) -> PageSnapshot {
        PageSnapshot::new(1, elements)
    }

    #[test]
    fn exact_text_beats_substring() {
        let snap = snapshot(vec![
            PageElement::new("e1", "button", "Login now"),
            PageElement::new("e2", "button", "login"),
        ]);
        let resolver = KeywordResolver::new();
        let found = resolver.resolve("the Login button", &snap).unwrap();
        assert_eq!(found.ref_id, "e2");
        assert_eq!(found.score, EXACT_TEXT);
    }

    #[test]
    fn higher_composite_score_wins() {
        // e1 scores 100 (exact text), e2 scores 40 (substring).
        let snap = snapshot(vec![
            PageElement::new("e1", "button", "submit"),
            PageElement::new("e2", "button", "submit your order"),
        ]);
        let resolver = KeywordResolver::new();
        let found = resolver.resolve("submit", &snap).unwrap();
        assert_eq!(found.ref_id, "e1");
    }

    #[test]
    fn tie_breaks_to_first_in_snapshot_order() {
        let snap = snapshot(vec![
            PageElement::new("e1", "button", "Save"),
            PageElement::new("e2", "button", "Save"),
        ]);
        let resolver = KeywordResolver::new();
        let found = resolver.resolve("save", &snap).unwrap();
        assert_eq!(found.ref_id, "e1");
    }

    #[test]
    fn placeholder_and_name_contribute() {
        let snap = snapshot(vec![
            PageElement::new("e1", "textbox", "").with_attr("placeholder", "email"),
            PageElement::new("e2", "textbox", "").with_attr("name", "email"),
        ]);
        let resolver = KeywordResolver::new();
        let found = resolver.resolve("email field", &snap).unwrap();
        // Exact placeholder (+80) outranks exact name (+60).
        assert_eq!(found.ref_id, "e1");
    }

    #[test]
    fn keywords_sum_across_fields() {
        let snap = snapshot(vec![
            PageElement::new("e1", "textbox", "Email").with_attr("name", "email"),
            PageElement::new("e2", "textbox", "Email"),
        ]);
        let resolver = KeywordResolver::new();
        let found = resolver.resolve("email", &snap).unwrap();
        assert_eq!(found.ref_id, "e1");
        assert_eq!(found.score, EXACT_TEXT + EXACT_NAME);
    }

    #[test]
    fn similarity_fallback_accepts_close_match() {
        let snap = snapshot(vec![PageElement::new("e1", "button", "Anmeldung")]);
        let resolver = KeywordResolver::new();
        // No keyword overlap at all, but high character similarity.
        let found = resolver.resolve("anmeldugn", &snap).unwrap();
        assert_eq!(found.ref_id, "e1");
        assert!(found.score >= DEFAULT_MIN_SIMILARITY);
    }

    #[test]
    fn no_match_below_similarity_floor() {
        let snap = snapshot(vec![PageElement::new("e1", "button", "zzzz")]);
        let resolver = KeywordResolver::new();
        let err = resolver.resolve("completely unrelated", &snap).unwrap_err();
        assert!(matches!(err, LocatorError::NoMatch { .. }));
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let resolver = KeywordResolver::new();
        assert!(matches!(
            resolver.resolve("  ", &snapshot(vec![PageElement::new("e1", "button", "x")])),
            Err(LocatorError::EmptyTarget)
        ));
        assert!(matches!(
            resolver.resolve("target", &snapshot(vec![])),
            Err(LocatorError::EmptySnapshot)
        ));
    }

    #[test]
    fn first_of_role_respects_snapshot_order() {
        let snap = snapshot(vec![
            PageElement::new("e1", "textbox", "Email"),
            PageElement::new("e2", "button", "Login"),
            PageElement::new("e3", "button", "Cancel"),
        ]);
        let resolver = KeywordResolver::new();
        let found = resolver.first_of_role(&snap, "button").unwrap();
        assert_eq!(found.ref_id, "e2");
        assert!(resolver.first_of_role(&snap, "slider").is_none());
    }
}
