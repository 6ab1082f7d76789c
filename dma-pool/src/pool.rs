//! Coherent pool allocator.
//!
//! First-fit, page-granular allocation over a single physical window.
//! Live blocks are tracked by base address so the engine model can resolve
//! any bus address back to the block that backs it.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use log::{debug, trace};
use spin::Mutex;

use crate::block::CoherentBlock;
use crate::{align_up, PhysRegion, PoolError, Result, PAGE_SIZE};

// ============================================================================
// Pool state
// ============================================================================

struct PoolState {
    /// Live blocks keyed by physical base.
    live: BTreeMap<u64, Arc<CoherentBlock>>,
    /// Bytes currently handed out.
    used: usize,
}

// ============================================================================
// CoherentPool - Main API
// ============================================================================

/// Coherent DMA memory pool.
///
/// Construct one per physical window and share it by `Arc`. Blocks are
/// returned zeroed.
pub struct CoherentPool {
    region: PhysRegion,
    state: Mutex<PoolState>,
}

impl CoherentPool {
    /// Create a pool over `region`.
    ///
    /// # Returns
    ///
    /// `PoolError::InvalidRegion` unless the region passes
    /// [`PhysRegion::is_usable`].
    pub fn new(region: PhysRegion) -> Result<Self> {
        if !region.is_usable() {
            return Err(PoolError::InvalidRegion);
        }
        debug!(
            "dma-pool: window {:#x}..{:#x} ({} pages)",
            region.base,
            region.end(),
            region.size / PAGE_SIZE
        );
        Ok(Self {
            region,
            state: Mutex::new(PoolState {
                live: BTreeMap::new(),
                used: 0,
            }),
        })
    }

    /// The physical window this pool carves from.
    pub fn region(&self) -> PhysRegion {
        self.region
    }

    /// Allocate a zeroed block of at least `bytes` bytes.
    ///
    /// The size is rounded up to whole pages; the returned block starts on a
    /// page boundary.
    pub fn alloc(&self, bytes: usize) -> Result<Arc<CoherentBlock>> {
        if bytes == 0 {
            return Err(PoolError::ZeroSize);
        }
        if bytes > self.region.size {
            return Err(PoolError::OutOfMemory);
        }
        let size = align_up(bytes, PAGE_SIZE) as u64;

        let mut state = self.state.lock();

        // First fit: walk live blocks in address order looking for a gap
        let mut cursor = self.region.base;
        let mut found = None;
        for (&base, block) in state.live.iter() {
            if base - cursor >= size {
                found = Some(cursor);
                break;
            }
            cursor = base + block.len() as u64;
        }
        if found.is_none() && self.region.end() - cursor >= size {
            found = Some(cursor);
        }
        let paddr = found.ok_or(PoolError::OutOfMemory)?;

        let block = Arc::new(CoherentBlock::zeroed(paddr, size as usize));
        state.live.insert(paddr, Arc::clone(&block));
        state.used += size as usize;

        trace!("dma-pool: alloc {:#x} ({} bytes)", paddr, size);
        Ok(block)
    }

    /// Return the block based at `paddr` to the pool.
    ///
    /// Outstanding `Arc`s keep the storage alive, but the address range is
    /// immediately reusable and no longer resolvable.
    pub fn free(&self, paddr: u64) -> Result<()> {
        let mut state = self.state.lock();
        let block = state
            .live
            .remove(&paddr)
            .ok_or(PoolError::UnknownAddress(paddr))?;
        state.used -= block.len();
        trace!("dma-pool: free {:#x}", paddr);
        Ok(())
    }

    /// Look up the live block based exactly at `paddr`.
    pub fn get(&self, paddr: u64) -> Option<Arc<CoherentBlock>> {
        self.state.lock().live.get(&paddr).cloned()
    }

    /// Resolve any physical address inside a live block.
    ///
    /// # Returns
    ///
    /// The block and the byte offset of `paddr` within it.
    pub fn resolve(&self, paddr: u64) -> Option<(Arc<CoherentBlock>, usize)> {
        let state = self.state.lock();
        let (_, block) = state.live.range(..=paddr).next_back()?;
        if block.contains(paddr) {
            Some((Arc::clone(block), (paddr - block.paddr()) as usize))
        } else {
            None
        }
    }

    /// Read a word by physical address.
    pub fn read_u32(&self, paddr: u64) -> Option<u32> {
        self.resolve(paddr)
            .map(|(block, offset)| block.read_u32(offset))
    }

    /// Write a word by physical address.
    ///
    /// # Returns
    ///
    /// `false` when no live block covers `paddr`.
    pub fn write_u32(&self, paddr: u64, value: u32) -> bool {
        match self.resolve(paddr) {
            Some((block, offset)) => {
                block.write_u32(offset, value);
                true
            }
            None => false,
        }
    }

    /// Bytes currently allocated.
    pub fn used(&self) -> usize {
        self.state.lock().used
    }

    /// Bytes still available (possibly fragmented).
    pub fn free_space(&self) -> usize {
        self.region.size - self.used()
    }

    /// Number of live blocks.
    pub fn live_blocks(&self) -> usize {
        self.state.lock().live.len()
    }
}

impl core::fmt::Debug for CoherentPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CoherentPool")
            .field("region", &self.region)
            .field("used", &self.used())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0x1000_0000;

    fn pool(pages: usize) -> CoherentPool {
        CoherentPool::new(PhysRegion::new(BASE, pages * PAGE_SIZE)).unwrap()
    }

    #[test]
    fn test_rejects_bad_region() {
        assert_eq!(
            CoherentPool::new(PhysRegion::new(0, 4 * PAGE_SIZE)).unwrap_err(),
            PoolError::InvalidRegion
        );
    }

    #[test]
    fn test_alloc_is_page_granular() {
        let pool = pool(8);
        let a = pool.alloc(100).unwrap();
        let b = pool.alloc(PAGE_SIZE + 1).unwrap();
        assert_eq!(a.paddr(), BASE);
        assert_eq!(a.len(), PAGE_SIZE);
        assert_eq!(b.paddr(), BASE + PAGE_SIZE as u64);
        assert_eq!(b.len(), 2 * PAGE_SIZE);
        assert_eq!(pool.used(), 3 * PAGE_SIZE);
        assert_eq!(pool.free_space(), 5 * PAGE_SIZE);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(pool(1).alloc(0).unwrap_err(), PoolError::ZeroSize);
    }

    #[test]
    fn test_exhaustion() {
        let pool = pool(2);
        pool.alloc(PAGE_SIZE).unwrap();
        pool.alloc(PAGE_SIZE).unwrap();
        assert_eq!(pool.alloc(1).unwrap_err(), PoolError::OutOfMemory);
        assert_eq!(pool.alloc(3 * PAGE_SIZE).unwrap_err(), PoolError::OutOfMemory);
    }

    #[test]
    fn test_free_reuses_first_gap() {
        let pool = pool(4);
        let a = pool.alloc(PAGE_SIZE).unwrap();
        let _b = pool.alloc(PAGE_SIZE).unwrap();
        pool.free(a.paddr()).unwrap();
        let c = pool.alloc(PAGE_SIZE).unwrap();
        assert_eq!(c.paddr(), BASE);
        assert_eq!(pool.live_blocks(), 2);
    }

    #[test]
    fn test_blocks_are_zeroed_after_reuse() {
        let pool = pool(1);
        let a = pool.alloc(PAGE_SIZE).unwrap();
        a.write_u32(0, 0xFFFF_FFFF);
        pool.free(a.paddr()).unwrap();
        let b = pool.alloc(PAGE_SIZE).unwrap();
        assert_eq!(b.read_u32(0), 0);
    }

    #[test]
    fn test_double_free() {
        let pool = pool(1);
        let a = pool.alloc(16).unwrap();
        pool.free(a.paddr()).unwrap();
        assert_eq!(pool.free(a.paddr()), Err(PoolError::UnknownAddress(BASE)));
    }

    #[test]
    fn test_resolve_interior_address() {
        let pool = pool(4);
        let _a = pool.alloc(PAGE_SIZE).unwrap();
        let b = pool.alloc(2 * PAGE_SIZE).unwrap();
        let (found, offset) = pool.resolve(b.paddr() + 0x1004).unwrap();
        assert_eq!(found.paddr(), b.paddr());
        assert_eq!(offset, 0x1004);
        assert!(pool.resolve(BASE + 3 * PAGE_SIZE as u64).is_none());
        assert!(pool.resolve(BASE - 4).is_none());
    }

    #[test]
    fn test_word_access_by_paddr() {
        let pool = pool(1);
        let a = pool.alloc(64).unwrap();
        assert!(pool.write_u32(a.paddr() + 8, 42));
        assert_eq!(a.read_u32(8), 42);
        assert_eq!(pool.read_u32(a.paddr() + 8), Some(42));
        assert!(!pool.write_u32(BASE + PAGE_SIZE as u64, 1));
    }
}
