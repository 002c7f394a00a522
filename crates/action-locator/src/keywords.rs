//! Keyword extraction from target descriptions.
//!
//! A target like `the "Sign in" button` or `input[placeholder=Email]`
//! yields the tokens that drive snapshot scoring: quoted substrings first,
//! then attribute-style `key=value` fragments, then bare words.

/// Extracted token with its origin, kept separate so scoring can weigh
/// quoted phrases the same as bare words while still logging provenance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Quoted(String),
    AttributeValue(String),
    Word(String),
}

impl Keyword {
    pub fn value(&self) -> &str {
        match self {
            Keyword::Quoted(v) | Keyword::AttributeValue(v) | Keyword::Word(v) => v,
        }
    }
}

const MIN_WORD_LEN: usize = 3;

/// Articles and structural words that carry no matching signal.
fn is_noise_word(word: &str) -> bool {
    matches!(
        word,
        "the" | "and" | "for" | "with" | "into" | "onto" | "from" | "that" | "this"
    )
}

/// Common HTML tag names that appear in selectors but never in visible text.
fn is_html_tag(word: &str) -> bool {
    matches!(
        word,
        "div" | "span" | "button" | "input" | "form" | "select" | "textarea" | "label" | "link"
    )
}

/// Extract scoring keywords from a target description or selector.
pub fn extract_keywords(target: &str) -> Vec<Keyword> {
    let mut keywords = Vec::new();

    // Quoted substrings, single or double.
    for quote in ['"', '\''] {
        let mut scan = target;
        while let Some(start) = scan.find(quote) {
            let after = &scan[start + 1..];
            match after.find(quote) {
                Some(end) => {
                    let inner = after[..end].trim();
                    if !inner.is_empty() {
                        keywords.push(Keyword::Quoted(inner.to_lowercase()));
                    }
                    scan = &after[end + 1..];
                }
                None => break,
            }
        }
    }

    // Attribute-style fragments: name=login, [placeholder=Email].
    for fragment in target.split(|c: char| c.is_whitespace() || c == '[' || c == ']') {
        if let Some((_, value)) = fragment.split_once('=') {
            let cleaned = value.trim_matches(|c| matches!(c, '"' | '\'' | ']')).trim();
            if !cleaned.is_empty() {
                keywords.push(Keyword::AttributeValue(cleaned.to_lowercase()));
            }
        }
    }

    // Bare words, with selector punctuation stripped.
    let cleaned = target.replace(
        ['#', '.', '>', '+', '~', '[', ']', '=', '"', '\'', '(', ')', ','],
        " ",
    );
    for word in cleaned.split_whitespace() {
        let lower = word.to_lowercase();
        if lower.len() < MIN_WORD_LEN || is_noise_word(&lower) || is_html_tag(&lower) {
            continue;
        }
        if keywords.iter().any(|k| k.value() == lower) {
            continue;
        }
        keywords.push(Keyword::Word(lower));
    }

    keywords
}
