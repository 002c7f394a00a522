//! Locator error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("no element matched target '{target}'")]
    NoMatch { target: String },

    #[error("empty target description")]
    EmptyTarget,

    #[error("snapshot has no interactive elements")]
    EmptySnapshot,
}
