//! Coherent DMA memory pool.
//!
//! This crate owns the memory that is shared between the privileged
//! allocator, the caller and the DMA engine. Every block carries a
//! physical address; nothing outside this crate ever holds a raw pointer
//! into the backing store.
//!
//! # Design
//!
//! - **Explicit pool value**: a `CoherentPool` is constructed by whoever owns
//!   the physical window and passed around by `Arc`. There is no global pool.
//! - **Word-coherent storage**: blocks are arrays of `AtomicU32`, so a status
//!   word written by hardware is observed whole by software.
//! - **Physical lookup**: the engine model resolves any bus address to the
//!   live block containing it.
//!
//! # Usage
//!
//! ```
//! use sgdma_pool::{CoherentPool, PhysRegion, PAGE_SIZE};
//!
//! let pool = CoherentPool::new(PhysRegion::new(0x1000_0000, 64 * PAGE_SIZE)).unwrap();
//! let block = pool.alloc(4096).unwrap();
//! assert_eq!(block.paddr(), 0x1000_0000);
//! block.write_u32(0, 0xdead_beef);
//! assert_eq!(pool.read_u32(0x1000_0000), Some(0xdead_beef));
//! ```

#![no_std]

extern crate alloc;

pub mod block;
pub mod pool;

pub use block::CoherentBlock;
pub use pool::CoherentPool;

/// Page size (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Highest physical address the engine can reach. Descriptor address
/// fields are 32 bits wide.
pub const PHYS_LIMIT: u64 = 1 << 32;

// ============================================================================
// Utility functions
// ============================================================================

/// Align a value up to the given alignment.
#[inline]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

// ============================================================================
// Physical window
// ============================================================================

/// A physical address window handed to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysRegion {
    /// Base physical address.
    pub base: u64,
    /// Size in bytes.
    pub size: usize,
}

impl PhysRegion {
    /// Create a new physical region.
    pub const fn new(base: u64, size: usize) -> Self {
        Self { base, size }
    }

    /// Exclusive end address.
    pub const fn end(&self) -> u64 {
        self.base + self.size as u64
    }

    /// Check if the region is usable for DMA.
    ///
    /// Page-aligned, at least one page, not based at zero (offset zero is
    /// the register alias token) and fully below `PHYS_LIMIT`.
    pub fn is_usable(&self) -> bool {
        self.base != 0
            && self.base % PAGE_SIZE as u64 == 0
            && self.size >= PAGE_SIZE
            && self.size % PAGE_SIZE == 0
            && self.base.checked_add(self.size as u64).is_some_and(|end| end <= PHYS_LIMIT)
    }

    /// Check whether `paddr` falls inside the region.
    pub fn contains(&self, paddr: u64) -> bool {
        paddr >= self.base && paddr < self.end()
    }
}

// ============================================================================
// Error types
// ============================================================================

/// Pool errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Requested 0 bytes.
    ZeroSize,
    /// Not enough contiguous memory in the pool.
    OutOfMemory,
    /// Invalid memory region.
    InvalidRegion,
    /// No live block at this physical address.
    UnknownAddress(u64),
}

impl core::fmt::Display for PoolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "zero-sized allocation"),
            Self::OutOfMemory => write!(f, "coherent pool exhausted"),
            Self::InvalidRegion => write!(f, "physical region unusable for DMA"),
            Self::UnknownAddress(paddr) => write!(f, "no live block at {:#x}", paddr),
        }
    }
}

/// Result type for pool operations.
pub type Result<T> = core::result::Result<T, PoolError>;

// ============================================================================
// Tests
// ============================================================================
