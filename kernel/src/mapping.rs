//! Caller-side mappings of coherent blocks.
//!
//! Each connection owns an [`AddressSpace`] standing in for the caller's
//! virtual address range. A [`Mapping`] pairs a block with the address it
//! was placed at; translation between the two is affine.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::trace;
use sgdma_pool::{align_up, CoherentBlock, PAGE_SIZE};
use spin::Mutex;

/// Default base of the caller-visible window.
pub const USER_VM_BASE: u64 = 0x7f00_0000_0000;

/// A caller's virtual address window.
///
/// First-fit, page-granular placement. Ranges are released when their
/// [`Mapping`] drops.
pub struct AddressSpace {
    base: u64,
    size: u64,
    live: Mutex<BTreeMap<u64, u64>>,
}

impl AddressSpace {
    pub fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            live: Mutex::new(BTreeMap::new()),
        }
    }

    /// Reserve `len` bytes; `None` when the window is full.
    fn reserve(&self, len: usize) -> Option<u64> {
        let len = align_up(len, PAGE_SIZE) as u64;
        let end = self.base + self.size;
        let mut live = self.live.lock();

        let mut cursor = self.base;
        for (&start, &size) in live.iter() {
            if start - cursor >= len {
                break;
            }
            cursor = start + size;
        }
        if end.saturating_sub(cursor) < len {
            return None;
        }
        live.insert(cursor, len);
        Some(cursor)
    }

    fn release(&self, vaddr: u64) {
        self.live.lock().remove(&vaddr);
    }

    /// Bytes currently mapped.
    pub fn mapped_bytes(&self) -> u64 {
        self.live.lock().values().sum()
    }

    /// Number of live mappings.
    pub fn mapping_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Map `len` bytes of `block` into this window.
    pub(crate) fn map(self: &Arc<Self>, block: Arc<CoherentBlock>, len: usize) -> Option<Mapping> {
        let vaddr = self.reserve(len)?;
        trace!(
            "sgdma: map {:#x} -> {:#x} ({} bytes)",
            block.paddr(),
            vaddr,
            len
        );
        Some(Mapping {
            block,
            len,
            vaddr,
            space: Arc::clone(self),
        })
    }
}

/// A coherent block as seen from the caller.
///
/// Holds its own reference to the block; the privileged side's bookkeeping
/// and this handle meet only at the physical address.
pub struct Mapping {
    block: Arc<CoherentBlock>,
    len: usize,
    vaddr: u64,
    space: Arc<AddressSpace>,
}

impl Mapping {
    /// Caller-visible base address.
    #[inline]
    pub fn vaddr(&self) -> u64 {
        self.vaddr
    }

    /// Physical base address.
    #[inline]
    pub fn paddr(&self) -> u64 {
        self.block.paddr()
    }

    /// Mapped length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing storage.
    #[inline]
    pub fn block(&self) -> &CoherentBlock {
        &self.block
    }

    /// Translate a caller address inside the mapping.
    pub fn virt_to_phys(&self, vaddr: u64) -> Option<u64> {
        let offset = vaddr.checked_sub(self.vaddr)?;
        (offset < self.len as u64).then(|| self.paddr() + offset)
    }

    /// Translate a physical address inside the mapping.
    pub fn phys_to_virt(&self, paddr: u64) -> Option<u64> {
        let offset = paddr.checked_sub(self.paddr())?;
        (offset < self.len as u64).then(|| self.vaddr + offset)
    }

    /// Copy out of the mapping; clamped to the mapped length.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        let avail = self.len.saturating_sub(offset);
        let n = buf.len().min(avail);
        self.block.read_bytes(offset, &mut buf[..n])
    }

    /// Copy into the mapping; clamped to the mapped length.
    pub fn write(&self, offset: usize, data: &[u8]) -> usize {
        let avail = self.len.saturating_sub(offset);
        let n = data.len().min(avail);
        self.block.write_bytes(offset, &data[..n])
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        trace!("sgdma: unmap {:#x}", self.vaddr);
        self.space.release(self.vaddr);
    }
}

impl core::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mapping")
            .field("vaddr", &format_args!("{:#x}", self.vaddr))
            .field("paddr", &format_args!("{:#x}", self.paddr()))
            .field("len", &self.len)
            .finish()
    }
}
