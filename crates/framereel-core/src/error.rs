//! Error types for framereel.

use thiserror::Error;

/// Main error type for framereel operations.
///
/// `EndOfStream` is the normal termination of a cursor and is only surfaced
/// as an error by operations that cannot complete a multi-frame request;
/// single-frame reads report end of stream as `Ok(None)` instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReelError {
    #[error("end of stream")]
    EndOfStream,

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ReelError {
    /// Build a backend failure from anything displayable.
    pub fn backend(message: impl std::fmt::Display) -> Self {
        Self::Backend(message.to_string())
    }
}

/// Result type alias for framereel operations.
pub type Result<T> = std::result::Result<T, ReelError>;
