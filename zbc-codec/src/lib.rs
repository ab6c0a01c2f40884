//! zbc Codec - Zstandard block compression for copy-on-write block storage
//!
//! This crate adapts the Zstandard codec to a per-block compression path:
//!
//! - Self-describing 8-byte frame headers (length, codec version, level)
//! - Logical level mapping, including the negative "fast" levels
//! - A bounded, recycling memory pool for codec contexts
//! - A reserved fallback slab so decompression never fails for want of memory
//!
//! The compression side is best-effort: when a block cannot be compressed
//! below its original size (or the codec cannot get memory), [`BlockCodec::compress`]
//! returns the input length and the caller stores the block raw. The
//! decompression side is mandatory: a well-formed frame always decodes.

#![warn(missing_docs)]

pub mod codec;
mod context;
mod mempool;

// Re-export commonly used types
pub use codec::{BlockCodec, CodecConfig};
pub use zbc_format::{stored_level, BlockHeader, Level, Result, ZbcError, DEFAULT_LEVEL, HEADER_SIZE};
