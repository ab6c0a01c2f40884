//! Block compress/decompress entry points

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use tracing::warn;

use zbc_format::{BlockHeader, Level, Result, ZbcError, HEADER_SIZE};

use crate::context::{
    codec_version, dctx_size_estimate, CompressContext, DctxMemory, DecompressContext,
};
use crate::mempool::{FallbackMem, MemPool, SLOT_TIMEOUT};

/// Pool geometry. The default follows the sizing rule applied at module init:
/// at least 16 slots, scaled with the machine's parallelism.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Slots per pool (one pool for compression contexts, one for
    /// decompression contexts).
    pub pool_slots: usize,
    /// Idle time after which a slot's buffer is retired.
    pub slot_timeout: Duration,
}

impl Default for CodecConfig {
    fn default() -> Self {
        let cpus = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            pool_slots: (4 * cpus).max(16),
            slot_timeout: SLOT_TIMEOUT,
        }
    }
}

/// The block codec: framing, level mapping, and pooled context memory.
///
/// Construction reserves everything decompression needs to make progress
/// under memory pressure; dropping the codec releases the pools and the
/// reserved slab.
///
/// Compression is best-effort: any internal failure is reported as "declined"
/// (the return value equals the input length) and the block layer stores the
/// block raw. Decompression of a well-formed frame does not fail for want of
/// memory.
pub struct BlockCodec {
    cctx_mem: MemPool,
    dctx_mem: DctxMemory,
    version: u32,
}

impl BlockCodec {
    /// Create a codec with default pool geometry.
    pub fn new() -> BlockCodec {
        BlockCodec::with_config(CodecConfig::default())
    }

    /// Create a codec with explicit pool geometry.
    pub fn with_config(config: CodecConfig) -> BlockCodec {
        BlockCodec {
            cctx_mem: MemPool::new(config.pool_slots, config.slot_timeout),
            dctx_mem: DctxMemory {
                pool: MemPool::new(config.pool_slots, config.slot_timeout),
                fallback: FallbackMem::new(dctx_size_estimate()),
            },
            version: codec_version(),
        }
    }

    /// Compress `src` into `dst`, returning the framed length.
    ///
    /// A return value equal to `src.len()` means compression was declined —
    /// the payload would not fit `dst` (callers size `dst` no larger than
    /// `src` to refuse unprofitable compression), the codec failed, or no
    /// context memory was available — and the caller stores the block
    /// uncompressed. `Inherit`/`Default` are resolved to the system default
    /// level before the frame is written, so a stored frame always reports a
    /// concrete level.
    pub fn compress(&self, src: &[u8], dst: &mut [u8], level: Level) -> usize {
        let declined = src.len();

        if dst.len() < HEADER_SIZE {
            return declined;
        }

        let level = level.normalize();
        let cookie = level.cookie();

        let Some(mut cctx) = CompressContext::create(&self.cctx_mem) else {
            return declined;
        };

        let payload_len = match cctx.compress(&mut dst[HEADER_SIZE..], src, cookie) {
            Ok(n) => n,
            Err(_) => return declined,
        };
        let Ok(payload_len_u32) = u32::try_from(payload_len) else {
            return declined;
        };

        BlockHeader {
            payload_len: payload_len_u32,
            version: self.version,
            level,
        }
        .write_to(dst);

        payload_len + HEADER_SIZE
    }

    /// Decompress one frame into `dst`.
    pub fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        self.decompress_with_level(src, dst).map(|_| ())
    }

    /// Decompress one frame and report the level it was compressed at.
    ///
    /// The level comes from the frame header and is not needed for decoding
    /// itself; callers use it to re-compress the block with matching
    /// settings.
    pub fn decompress_with_level(&self, src: &[u8], dst: &mut [u8]) -> Result<Level> {
        let hdr = BlockHeader::decode(src).map_err(|err| {
            warn!(%err, frame_len = src.len(), "rejecting corrupt frame");
            err
        })?;
        let payload = &src[HEADER_SIZE..HEADER_SIZE + hdr.payload_len as usize];

        let Some(mut dctx) = DecompressContext::create(&self.dctx_mem) else {
            return Err(ZbcError::ContextUnavailable);
        };
        dctx.decompress(dst, payload)
            .map_err(ZbcError::Codec)?;

        Ok(hdr.level)
    }
}

impl Default for BlockCodec {
    fn default() -> Self {
        BlockCodec::new()
    }
}
