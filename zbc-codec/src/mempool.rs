//! Bounded buffer pool backing codec context allocation
//!
//! Codec contexts are large, short-lived allocations on a hot path. The pool
//! keeps a fixed number of slots whose buffers are recycled between calls and
//! retired after two minutes of idleness. Every buffer handed out carries an
//! ownership tag just before the payload, so the release path can tell a
//! pooled buffer from a plain heap allocation or the reserved fallback slab
//! without any help from the codec.

use std::alloc::{alloc, alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Alignment of every buffer handed to the codec.
pub(crate) const BUF_ALIGN: usize = 16;

/// Bytes reserved for the ownership tag ahead of the payload. A multiple of
/// [`BUF_ALIGN`] so the payload keeps the allocation's alignment.
pub(crate) const TAG_SIZE: usize = 32;

const PAGE_SIZE: usize = 4096;

/// How long an idle slot keeps its buffer before the next scan retires it.
pub(crate) const SLOT_TIMEOUT: Duration = Duration::from_secs(120);

const KIND_HEAP: u32 = 1;
const KIND_POOLED: u32 = 2;
const KIND_FALLBACK: u32 = 3;

/// Ownership tag stored at offset 0 of every allocation; the codec only ever
/// sees the region starting [`TAG_SIZE`] bytes in.
#[repr(C)]
struct BufTag {
    kind: u32,
    _reserved: u32,
    /// Full allocation size including the tag (used to rebuild the layout
    /// when freeing a heap buffer).
    total: usize,
    /// Back-reference to the owning [`Slot`] or [`FallbackMem`]; null for
    /// heap buffers. Non-owning: the owner always outlives the allocation.
    owner: *const (),
}

const _: () = assert!(std::mem::size_of::<BufTag>() <= TAG_SIZE);
const _: () = assert!(TAG_SIZE % BUF_ALIGN == 0);

/// An aligned raw allocation, tag region included.
struct RawBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: RawBuf is a plain owned allocation; the pointer is not shared
// outside the slot protocols below.
unsafe impl Send for RawBuf {}

impl RawBuf {
    fn alloc(total: usize) -> Option<RawBuf> {
        let layout = Layout::from_size_align(total, BUF_ALIGN).ok()?;
        // SAFETY: layout has non-zero size (total always includes TAG_SIZE)
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr).map(|ptr| RawBuf { ptr, layout })
    }

    /// Zero-filled variant for init-time reservations that must not fail.
    fn alloc_zeroed(total: usize) -> RawBuf {
        let Ok(layout) = Layout::from_size_align(total, BUF_ALIGN) else {
            handle_alloc_error(Layout::new::<BufTag>());
        };
        // SAFETY: layout has non-zero size
        let ptr = unsafe { alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => RawBuf { ptr, layout },
            None => handle_alloc_error(layout),
        }
    }

    fn payload_capacity(&self) -> usize {
        self.layout.size() - TAG_SIZE
    }

    /// Stamp the ownership tag and hand out the payload region.
    fn stamp(&self, kind: u32, owner: *const ()) -> NonNull<u8> {
        let tag = BufTag {
            kind,
            _reserved: 0,
            total: self.layout.size(),
            owner,
        };
        // SAFETY: the allocation is at least TAG_SIZE bytes, BUF_ALIGN
        // aligned, and exclusively ours while stamped (slot busy flag or
        // fallback mutex).
        unsafe {
            self.ptr.as_ptr().cast::<BufTag>().write(tag);
            NonNull::new_unchecked(self.ptr.as_ptr().add(TAG_SIZE))
        }
    }
}

impl Drop for RawBuf {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

struct SlotState {
    buf: Option<RawBuf>,
    /// Valid while `buf` is Some: idle buffers past this instant are retired
    /// by the next scan.
    deadline: Instant,
    busy: bool,
}

/// One cell of the pool. The slot mutex guards the metadata; the `busy` flag
/// marks the buffer as checked out between a claim and its matching release.
struct Slot {
    state: Mutex<SlotState>,
}

impl Slot {
    fn new() -> Slot {
        Slot {
            state: Mutex::new(SlotState {
                buf: None,
                deadline: Instant::now(),
                busy: false,
            }),
        }
    }

    fn release(&self) {
        let mut st = self.state.lock();
        debug_assert!(st.busy, "release of a slot that was not checked out");
        st.busy = false;
    }
}

/// Bounded recycling pool, one per context kind (compression/decompression).
pub(crate) struct MemPool {
    slots: Box<[Slot]>,
    slot_timeout: Duration,
}

impl MemPool {
    pub(crate) fn new(slot_count: usize, slot_timeout: Duration) -> MemPool {
        MemPool {
            slots: (0..slot_count).map(|_| Slot::new()).collect(),
            slot_timeout,
        }
    }

    /// Claim a buffer of at least `payload_len` usable bytes.
    ///
    /// Two passes over the slots, skipping any that are contended:
    /// first reuse a warm buffer that fits (retiring expired idle buffers
    /// along the way), then install a fresh allocation in an empty slot.
    /// Returns None when the pool is saturated or the backing allocation
    /// fails; the caller decides whether to fall back further.
    pub(crate) fn claim(&self, payload_len: usize) -> Option<NonNull<u8>> {
        let now = Instant::now();
        let mut claimed = None;

        for slot in self.slots.iter() {
            let Some(mut st) = slot.state.try_lock() else {
                continue;
            };
            if claimed.is_none() && !st.busy {
                if let Some(buf) = &st.buf {
                    if buf.payload_capacity() >= payload_len {
                        claimed =
                            Some(buf.stamp(KIND_POOLED, slot as *const Slot as *const ()));
                        st.busy = true;
                        st.deadline = now + self.slot_timeout;
                        continue;
                    }
                }
            }
            if !st.busy && st.buf.is_some() && now > st.deadline {
                st.buf = None;
            }
        }
        if claimed.is_some() {
            return claimed;
        }

        for slot in self.slots.iter() {
            let Some(mut st) = slot.state.try_lock() else {
                continue;
            };
            if st.busy || st.buf.is_some() {
                continue;
            }
            let Some(buf) = RawBuf::alloc(TAG_SIZE + payload_len) else {
                continue;
            };
            let payload = buf.stamp(KIND_POOLED, slot as *const Slot as *const ());
            st.buf = Some(buf);
            st.deadline = now + self.slot_timeout;
            st.busy = true;
            return Some(payload);
        }

        None
    }
}

/// Unpooled path: a plain heap allocation released straight back to the
/// allocator. Used when the pool is saturated.
pub(crate) fn claim_heap(payload_len: usize) -> Option<NonNull<u8>> {
    let buf = RawBuf::alloc(TAG_SIZE + payload_len)?;
    let payload = buf.stamp(KIND_HEAP, std::ptr::null());
    // Ownership moves into the tag; reconstructed from it on release.
    std::mem::forget(buf);
    Some(payload)
}

/// Single reserved slab guaranteeing decompression can always obtain context
/// memory. Claimants block until the slab is free, so contending readers
/// serialise here instead of failing.
pub(crate) struct FallbackMem {
    buf: RawBuf,
    busy: Mutex<bool>,
    freed: Condvar,
}

// SAFETY: the slab buffer is only handed out under the busy flag, which the
// mutex/condvar pair keeps exclusive.
unsafe impl Send for FallbackMem {}
unsafe impl Sync for FallbackMem {}

impl FallbackMem {
    /// Reserve a page-rounded slab able to hold one allocation of
    /// `reserve_len` payload bytes. Init-time only; aborts on impossible
    /// allocation failure rather than leaving reads unprotected.
    pub(crate) fn new(reserve_len: usize) -> FallbackMem {
        let total = (TAG_SIZE + reserve_len).next_multiple_of(PAGE_SIZE);
        FallbackMem {
            buf: RawBuf::alloc_zeroed(total),
            busy: Mutex::new(false),
            freed: Condvar::new(),
        }
    }

    /// Block until the slab is free, then claim it. None only when the
    /// request exceeds the reservation itself.
    pub(crate) fn claim(&self, payload_len: usize) -> Option<NonNull<u8>> {
        if payload_len > self.buf.payload_capacity() {
            return None;
        }
        let mut busy = self.busy.lock();
        while *busy {
            self.freed.wait(&mut busy);
        }
        *busy = true;
        debug!(payload_len, "decompression using the reserved fallback slab");
        Some(self.buf.stamp(KIND_FALLBACK, self as *const FallbackMem as *const ()))
    }

    fn release(&self) {
        let mut busy = self.busy.lock();
        debug_assert!(*busy, "release of an idle fallback slab");
        *busy = false;
        self.freed.notify_one();
    }
}

/// Release a buffer previously handed out by any of the claim paths.
///
/// # Safety
///
/// `payload` must come from [`MemPool::claim`], [`claim_heap`] or
/// [`FallbackMem::claim`], must not have been released already, and the
/// owning pool/slab must still be alive.
pub(crate) unsafe fn release(payload: NonNull<u8>) {
    // SAFETY: every claim path places a BufTag TAG_SIZE bytes ahead of the
    // payload; the caller guarantees the buffer is still checked out.
    unsafe {
        let base = payload.as_ptr().sub(TAG_SIZE);
        let tag = base.cast::<BufTag>().read();
        match tag.kind {
            KIND_HEAP => {
                let layout = Layout::from_size_align_unchecked(tag.total, BUF_ALIGN);
                dealloc(base, layout);
            }
            KIND_POOLED => (*(tag.owner as *const Slot)).release(),
            KIND_FALLBACK => (*(tag.owner as *const FallbackMem)).release(),
            other => debug_assert!(false, "corrupt allocation tag kind {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn kind_of(payload: NonNull<u8>) -> u32 {
        // SAFETY: test buffers come straight from the claim paths
        unsafe { payload.as_ptr().sub(TAG_SIZE).cast::<BufTag>().read().kind }
    }

    #[test]
    fn test_claim_reuses_released_buffer() {
        let pool = MemPool::new(4, SLOT_TIMEOUT);
        let first = pool.claim(256).unwrap();
        unsafe { release(first) };

        let second = pool.claim(128).unwrap();
        assert_eq!(first.as_ptr(), second.as_ptr());
        assert_eq!(kind_of(second), KIND_POOLED);
        unsafe { release(second) };
    }

    #[test]
    fn test_small_buffer_not_reused_for_larger_request() {
        let pool = MemPool::new(4, SLOT_TIMEOUT);
        let small = pool.claim(64).unwrap();
        unsafe { release(small) };

        let large = pool.claim(4096).unwrap();
        assert_ne!(small.as_ptr(), large.as_ptr());
        unsafe { release(large) };
    }

    #[test]
    fn test_saturated_pool_returns_none() {
        let pool = MemPool::new(2, SLOT_TIMEOUT);
        let a = pool.claim(64).unwrap();
        let b = pool.claim(64).unwrap();
        assert!(pool.claim(64).is_none());
        unsafe {
            release(a);
            release(b);
        }
        assert!(pool.claim(64).is_some());
    }

    #[test]
    fn test_heap_claim_is_tagged_heap() {
        let p = claim_heap(512).unwrap();
        assert_eq!(kind_of(p), KIND_HEAP);
        unsafe { release(p) };
    }

    #[test]
    fn test_expired_idle_buffer_is_retired() {
        let pool = MemPool::new(1, Duration::ZERO);
        let p = pool.claim(64).unwrap();
        unsafe { release(p) };
        thread::sleep(Duration::from_millis(5));

        // Too big to reuse; the expired buffer must be retired so the fresh
        // allocation can take the slot.
        let q = pool.claim(1024).unwrap();
        assert_eq!(kind_of(q), KIND_POOLED);
        unsafe { release(q) };
    }

    #[test]
    fn test_busy_slot_never_retired() {
        let pool = MemPool::new(2, Duration::ZERO);
        let held = pool.claim(64).unwrap();
        thread::sleep(Duration::from_millis(5));
        // Scans while `held` is checked out must leave its slot alone
        let other = pool.claim(64).unwrap();
        assert_ne!(held.as_ptr(), other.as_ptr());

        // Still writable after the scans
        unsafe { held.as_ptr().write_bytes(0x5A, 64) };
        unsafe {
            release(other);
            release(held);
        }
    }

    #[test]
    fn test_capacity_survives_smaller_claims() {
        let pool = MemPool::new(1, SLOT_TIMEOUT);
        let big = pool.claim(2048).unwrap();
        unsafe { release(big) };
        let small = pool.claim(16).unwrap();
        unsafe { release(small) };
        // Capacity never shrank, so the original request still fits pooled
        let again = pool.claim(2048).unwrap();
        assert_eq!(big.as_ptr(), again.as_ptr());
        unsafe { release(again) };
    }

    #[test]
    fn test_fallback_rejects_oversized_request() {
        let fallback = FallbackMem::new(1024);
        assert!(fallback.claim(1 << 20).is_none());
    }

    #[test]
    fn test_fallback_serialises_claimants() {
        let fallback = Arc::new(FallbackMem::new(4096));
        let peak = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let fallback = Arc::clone(&fallback);
            let peak = Arc::clone(&peak);
            let active = Arc::clone(&active);
            handles.push(thread::spawn(move || {
                for _ in 0..25 {
                    let p = fallback.claim(4096).unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(50));
                    active.fetch_sub(1, Ordering::SeqCst);
                    unsafe { release(p) };
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // Serialised: never more than one claimant inside, and all completed
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_pool_claims_are_exclusive() {
        let pool = Arc::new(MemPool::new(4, SLOT_TIMEOUT));
        let mut handles = Vec::new();
        for t in 0..8usize {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for i in 0..200usize {
                    let len = 64 + (t * 37 + i * 11) % 1024;
                    let p = pool
                        .claim(len)
                        .or_else(|| claim_heap(len))
                        .expect("claim or heap");
                    // Scribble over the whole payload; overlap between two
                    // live claims would corrupt the other thread's pattern.
                    unsafe {
                        p.as_ptr().write_bytes(t as u8, len);
                        for off in 0..len {
                            assert_eq!(*p.as_ptr().add(off), t as u8);
                        }
                        release(p);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
