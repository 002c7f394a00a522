//! Element resolution for the webpilot execution engine.
//!
//! Scores every interactive element in a page snapshot against a target
//! description or selector: quoted substrings, attribute fragments, and
//! bare words each contribute weighted points for exact and substring
//! matches on element text, placeholder, and name. When no element scores
//! at all, a character-similarity fallback accepts the closest candidate
//! above a minimum ratio.

pub mod errors;
pub mod keywords;
pub mod resolver;

pub use errors::LocatorError;
pub use keywords::{extract_keywords, Keyword};
pub use resolver::{ElementResolver, KeywordResolver, DEFAULT_MIN_SIMILARITY};
