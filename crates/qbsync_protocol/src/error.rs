//! Error types for the protocol codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Maximum number of characters of the raw input kept for diagnostics.
const EXCERPT_LEN: usize = 200;

/// Malformed inbound XML.
///
/// Carries a prefix of the offending document so the failure can be
/// diagnosed from logs without retaining the whole payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed XML: {message} (input starts with {excerpt:?})")]
pub struct ParseError {
    /// What the parser rejected.
    pub message: String,
    /// Leading excerpt of the raw input.
    pub excerpt: String,
}

impl ParseError {
    /// Creates a parse error for the given raw input.
    pub fn new(message: impl Into<String>, raw: &str) -> Self {
        Self {
            message: message.into(),
            excerpt: raw.chars().take(EXCERPT_LEN).collect(),
        }
    }
}

/// Errors that can occur while encoding or decoding protocol payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input was not well-formed XML.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The XML was well-formed but not shaped as expected.
    #[error("invalid document structure: {message}")]
    InvalidStructure {
        /// Description of the structural problem.
        message: String,
    },

    /// A required element or attribute was absent.
    #[error("missing field: {0}")]
    MissingField(String),

    /// Serialization failed.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// A phase name outside the sync pipeline.
    #[error("unknown phase: {0:?}")]
    UnknownPhase(String),

    /// A date that is not `YYYY-MM-DD`.
    #[error("invalid date: {0:?}")]
    InvalidDate(String),
}

impl CodecError {
    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing_field(name: impl Into<String>) -> Self {
        Self::MissingField(name.into())
    }
}
