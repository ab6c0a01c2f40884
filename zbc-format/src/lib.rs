//! zbc Format - Wire primitives for zbc compressed block frames
//!
//! This crate provides the pure, no-I/O pieces of the zbc block format:
//!
//! - Logical compression levels and the codec cookie map
//! - The 8-byte big-endian frame header codec
//! - Error types
//!
//! Everything here is deterministic and allocation-free; the stateful
//! allocator and the codec bindings live in `zbc-codec`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod block;
pub mod error;
pub mod level;

// Re-export commonly used types
pub use block::{stored_level, BlockHeader, HEADER_SIZE};
pub use error::{Result, ZbcError};
pub use level::{Level, DEFAULT_LEVEL};
