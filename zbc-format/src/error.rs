//! Error types for zbc frames

use thiserror::Error;

/// zbc error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ZbcError {
    #[error("Frame shorter than the 8-byte header")]
    TruncatedFrame,
    #[error("Corrupt frame header")]
    HeaderInvalid,
    #[error("Unknown level tag: {0}")]
    UnknownLevelTag(u8),
    #[error("Unknown level cookie: {0}")]
    UnknownCookie(i32),
    #[error("No decompression context available")]
    ContextUnavailable,
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ZbcError>;
