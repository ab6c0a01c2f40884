//! RAII wrappers over the codec's context API
//!
//! Contexts are created through `ZSTD_customMem`, so every internal
//! allocation the codec makes is routed through the pools in
//! [`crate::mempool`]. Compression contexts draw from their pool with a plain
//! heap overflow path; decompression contexts additionally fall back to the
//! reserved slab so a read can always make progress.

use std::ffi::CStr;
use std::marker::PhantomData;
use std::os::raw::{c_int, c_void};
use std::ptr::NonNull;

use crate::mempool::{claim_heap, release, FallbackMem, MemPool};

/// Memory sources for decompression contexts: the pool, then the heap, then
/// the reserved slab.
pub(crate) struct DctxMemory {
    pub(crate) pool: MemPool,
    pub(crate) fallback: FallbackMem,
}

unsafe extern "C" fn cctx_alloc(opaque: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: opaque is the MemPool reference installed by
    // CompressContext::create, alive for the whole context lifetime.
    let pool = unsafe { &*(opaque as *const MemPool) };
    match pool.claim(size).or_else(|| claim_heap(size)) {
        Some(payload) => payload.as_ptr().cast(),
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn dctx_alloc(opaque: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: opaque is the DctxMemory reference installed by
    // DecompressContext::create, alive for the whole context lifetime.
    let mem = unsafe { &*(opaque as *const DctxMemory) };
    match mem
        .pool
        .claim(size)
        .or_else(|| claim_heap(size))
        .or_else(|| mem.fallback.claim(size))
    {
        Some(payload) => payload.as_ptr().cast(),
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn buf_free(_opaque: *mut c_void, address: *mut c_void) {
    let Some(payload) = NonNull::new(address.cast::<u8>()) else {
        return;
    };
    // SAFETY: the codec only frees what the paired alloc callback returned
    unsafe { release(payload) };
}

fn error_name(code: usize) -> String {
    // SAFETY: ZSTD_getErrorName always returns a static NUL-terminated string
    unsafe { CStr::from_ptr(zstd_sys::ZSTD_getErrorName(code)) }
        .to_string_lossy()
        .into_owned()
}

/// Codec library version, stamped into every frame header.
pub(crate) fn codec_version() -> u32 {
    // SAFETY: no preconditions
    unsafe { zstd_sys::ZSTD_versionNumber() }
}

/// Worst-case memory one decompression context needs; sizes the fallback
/// slab reservation.
pub(crate) fn dctx_size_estimate() -> usize {
    // SAFETY: no preconditions
    unsafe { zstd_sys::ZSTD_estimateDCtxSize() }
}

/// One-shot compression context drawing its memory from a [`MemPool`].
pub(crate) struct CompressContext<'a> {
    ctx: NonNull<zstd_sys::ZSTD_CCtx>,
    _mem: PhantomData<&'a MemPool>,
}

impl<'a> CompressContext<'a> {
    /// None when context memory cannot be obtained; compression is declined
    /// upstream in that case.
    pub(crate) fn create(mem: &'a MemPool) -> Option<CompressContext<'a>> {
        let custom = zstd_sys::ZSTD_customMem {
            customAlloc: Some(cctx_alloc),
            customFree: Some(buf_free),
            opaque: mem as *const MemPool as *mut c_void,
        };
        // SAFETY: the callbacks only touch `opaque`, which `'a` keeps alive
        // past the context (Drop runs within `'a`).
        let ctx = unsafe { zstd_sys::ZSTD_createCCtx_advanced(custom) };
        Some(CompressContext {
            ctx: NonNull::new(ctx)?,
            _mem: PhantomData,
        })
    }

    /// Compress `src` into `dst` at the given cookie. Err carries the codec's
    /// error name; the caller treats any failure as "declined".
    pub(crate) fn compress(&mut self, dst: &mut [u8], src: &[u8], cookie: i32) -> Result<usize, String> {
        // SAFETY: dst/src are valid for their full lengths; the context is
        // live and exclusively borrowed.
        let code = unsafe {
            zstd_sys::ZSTD_compressCCtx(
                self.ctx.as_ptr(),
                dst.as_mut_ptr().cast(),
                dst.len(),
                src.as_ptr().cast(),
                src.len(),
                cookie as c_int,
            )
        };
        // SAFETY: classifying a return code has no preconditions
        if unsafe { zstd_sys::ZSTD_isError(code) } != 0 {
            Err(error_name(code))
        } else {
            Ok(code)
        }
    }
}

impl Drop for CompressContext<'_> {
    fn drop(&mut self) {
        // SAFETY: ctx is live and owned by self
        unsafe { zstd_sys::ZSTD_freeCCtx(self.ctx.as_ptr()) };
    }
}

/// One-shot decompression context drawing its memory from a [`DctxMemory`].
pub(crate) struct DecompressContext<'a> {
    ctx: NonNull<zstd_sys::ZSTD_DCtx>,
    _mem: PhantomData<&'a DctxMemory>,
}

impl<'a> DecompressContext<'a> {
    /// None only when even the fallback slab is unavailable (a request larger
    /// than the init-time reservation).
    pub(crate) fn create(mem: &'a DctxMemory) -> Option<DecompressContext<'a>> {
        let custom = zstd_sys::ZSTD_customMem {
            customAlloc: Some(dctx_alloc),
            customFree: Some(buf_free),
            opaque: mem as *const DctxMemory as *mut c_void,
        };
        // SAFETY: as for CompressContext::create
        let ctx = unsafe { zstd_sys::ZSTD_createDCtx_advanced(custom) };
        Some(DecompressContext {
            ctx: NonNull::new(ctx)?,
            _mem: PhantomData,
        })
    }

    /// Decompress one frame payload. Err carries the codec's error name.
    pub(crate) fn decompress(&mut self, dst: &mut [u8], src: &[u8]) -> Result<usize, String> {
        // SAFETY: dst/src are valid for their full lengths; the context is
        // live and exclusively borrowed.
        let code = unsafe {
            zstd_sys::ZSTD_decompressDCtx(
                self.ctx.as_ptr(),
                dst.as_mut_ptr().cast(),
                dst.len(),
                src.as_ptr().cast(),
                src.len(),
            )
        };
        // SAFETY: classifying a return code has no preconditions
        if unsafe { zstd_sys::ZSTD_isError(code) } != 0 {
            Err(error_name(code))
        } else {
            Ok(code)
        }
    }
}

impl Drop for DecompressContext<'_> {
    fn drop(&mut self) {
        // SAFETY: ctx is live and owned by self
        unsafe { zstd_sys::ZSTD_freeDCtx(self.ctx.as_ptr()) };
    }
}
