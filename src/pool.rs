/// Pre-allocated QuoteRecord pool
///
/// Lock-free circular allocator: `acquire` hands out the slot at
/// `cursor % capacity` and never fails. Slots are never released, only
/// overwritten by later acquisitions, so a record is valid until `capacity`
/// further acquires happen. Callers must finish with a slot (decode, read,
/// publish) within one rotation; the pool does not enforce this.
///
/// Backing memory, tried in order:
///   1. anonymous huge-page mapping
///   2. anonymous huge-page mapping with explicit 2 MB page size
///   3. cache-line aligned heap allocation

use crate::record::{QuoteRecord, CACHE_LINE_SIZE};
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_POOL_CAPACITY: usize = 1024;
pub const MIN_POOL_CAPACITY: usize = 64;

#[cfg(target_os = "linux")]
const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("invalid pool capacity {capacity}: must be a power of two and at least 64")]
    InvalidCapacity { capacity: usize },

    #[error("failed to allocate {bytes} bytes for record pool")]
    AllocationFailed { bytes: usize },
}

/// Where the pool's slots live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    HugePages { mapped_len: usize },
    Heap { layout: Layout },
}

pub struct RecordPool {
    slots: NonNull<QuoteRecord>,
    capacity: usize,
    mask: usize,
    backing: Backing,
    // only incremented, wraps via mask
    cursor: AtomicUsize,
}

// The pool exclusively owns its backing memory; slots are only handed out
// through `&mut self`, so moving or sharing the pool cannot alias them.
unsafe impl Send for RecordPool {}
unsafe impl Sync for RecordPool {}

impl RecordPool {
    /// Allocate and zero a pool of `capacity` slots
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        validate_capacity(capacity)?;

        let bytes = capacity
            .checked_mul(std::mem::size_of::<QuoteRecord>())
            .ok_or(PoolError::InvalidCapacity { capacity })?;
        let (slots, backing) = allocate(bytes)?;

        let mut pool = RecordPool {
            slots,
            capacity,
            mask: capacity - 1,
            backing,
            cursor: AtomicUsize::new(0),
        };
        pool.prefault();

        info!(
            capacity,
            bytes,
            huge_pages = pool.is_using_huge_pages(),
            "record pool allocated"
        );
        Ok(pool)
    }

    /// Claim the next slot in the circular sequence. Always succeeds.
    #[inline(always)]
    pub fn acquire(&mut self) -> &mut QuoteRecord {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) & self.mask;
        // SAFETY: idx <= mask < capacity and every slot was initialized in `new`
        unsafe { &mut *self.slots.as_ptr().add(idx) }
    }

    /// No-op: slots are reclaimed by circular reuse
    #[inline(always)]
    pub fn release(_record: &mut QuoteRecord) {}

    /// Touch every slot so the working set is resident before timing-sensitive work
    pub fn warm(&self) {
        let mut sink = 0u64;
        for rec in self.as_slice() {
            // SAFETY: reading the first word of an initialized slot
            let word = unsafe { std::ptr::read_volatile(rec as *const QuoteRecord as *const u64) };
            sink = sink.wrapping_add(word);
        }
        std::hint::black_box(sink);
    }

    /// Read-only access to a slot by index
    pub fn get(&self, index: usize) -> Option<&QuoteRecord> {
        self.as_slice().get(index)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes(&self) -> usize {
        self.capacity * std::mem::size_of::<QuoteRecord>()
    }

    /// Total acquisitions so far
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    pub fn backing(&self) -> Backing {
        self.backing
    }

    pub fn is_using_huge_pages(&self) -> bool {
        matches!(self.backing, Backing::HugePages { .. })
    }

    fn as_slice(&self) -> &[QuoteRecord] {
        // SAFETY: `slots` points to `capacity` initialized records owned by self
        unsafe { std::slice::from_raw_parts(self.slots.as_ptr(), self.capacity) }
    }

    // Page faults are paid here, not during trading
    fn prefault(&mut self) {
        let base = self.slots.as_ptr();
        for i in 0..self.capacity {
            // SAFETY: i < capacity; writing a whole record needs no prior init
            unsafe { base.add(i).write(QuoteRecord::default()) };
        }
    }
}

impl Drop for RecordPool {
    fn drop(&mut self) {
        match self.backing {
            #[cfg(target_os = "linux")]
            Backing::HugePages { mapped_len } => unsafe {
                libc::munmap(self.slots.as_ptr() as *mut libc::c_void, mapped_len);
            },
            #[cfg(not(target_os = "linux"))]
            Backing::HugePages { .. } => {}
            Backing::Heap { layout } => unsafe {
                alloc::dealloc(self.slots.as_ptr() as *mut u8, layout);
            },
        }
    }
}

impl std::fmt::Debug for RecordPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordPool")
            .field("capacity", &self.capacity)
            .field("backing", &self.backing)
            .field("cursor", &self.cursor())
            .finish()
    }
}

pub fn validate_capacity(capacity: usize) -> Result<(), PoolError> {
    if capacity < MIN_POOL_CAPACITY || !capacity.is_power_of_two() {
        return Err(PoolError::InvalidCapacity { capacity });
    }
    Ok(())
}

fn allocate(bytes: usize) -> Result<(NonNull<QuoteRecord>, Backing), PoolError> {
    #[cfg(target_os = "linux")]
    {
        if let Some(found) = map_huge_pages(bytes, 0) {
            return Ok(found);
        }
        debug!(bytes, "default huge page mapping unavailable");

        if let Some(found) = map_huge_pages(bytes, 21 << libc::MAP_HUGE_SHIFT) {
            return Ok(found);
        }
        debug!(bytes, "2MB huge page mapping unavailable, falling back to heap");
    }

    allocate_heap(bytes)
}

#[cfg(target_os = "linux")]
fn map_huge_pages(bytes: usize, size_flag: libc::c_int) -> Option<(NonNull<QuoteRecord>, Backing)> {
    let mapped_len = bytes.div_ceil(HUGE_PAGE_SIZE) * HUGE_PAGE_SIZE;
    // SAFETY: anonymous private mapping, no fd, result checked against MAP_FAILED
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            mapped_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB | size_flag,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return None;
    }
    NonNull::new(ptr as *mut QuoteRecord).map(|p| (p, Backing::HugePages { mapped_len }))
}

fn allocate_heap(bytes: usize) -> Result<(NonNull<QuoteRecord>, Backing), PoolError> {
    let layout = Layout::from_size_align(bytes, CACHE_LINE_SIZE)
        .map_err(|_| PoolError::AllocationFailed { bytes })?;
    // SAFETY: layout has non-zero size (capacity >= MIN_POOL_CAPACITY)
    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    NonNull::new(ptr as *mut QuoteRecord)
        .map(|p| (p, Backing::Heap { layout }))
        .ok_or(PoolError::AllocationFailed { bytes })
}
