//! Caller-side DMA buffer.

use sgdma_kernel::Mapping;

/// One data buffer of a channel, mapped into the caller's address space.
///
/// Address and length are fixed from alloc until free. Contents may only be
/// touched while software owns the buffer's descriptor.
pub struct DmaBuffer {
    /// Caller mapping of the coherent block.
    mapping: Mapping,
    /// Ring slot this buffer is attached to.
    index: usize,
}

impl DmaBuffer {
    pub(crate) fn new(mapping: Mapping, index: usize) -> Self {
        Self { mapping, index }
    }

    /// Ring slot / handle of this buffer.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Caller-visible address.
    pub fn vaddr(&self) -> u64 {
        self.mapping.vaddr()
    }

    /// Device-visible bus address.
    pub fn paddr(&self) -> u64 {
        self.mapping.paddr()
    }

    /// Buffer capacity in bytes.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Translate a caller address inside this buffer to its bus address.
    pub fn virt_to_phys(&self, vaddr: u64) -> Option<u64> {
        self.mapping.virt_to_phys(vaddr)
    }

    /// Translate a bus address inside this buffer to its caller address.
    pub fn phys_to_virt(&self, paddr: u64) -> Option<u64> {
        self.mapping.phys_to_virt(paddr)
    }

    /// Copy out of the buffer. Returns bytes copied.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.mapping.read(offset, buf)
    }

    /// Copy into the buffer. Returns bytes copied.
    pub fn write(&self, offset: usize, data: &[u8]) -> usize {
        self.mapping.write(offset, data)
    }

    /// Copy the first `len` bytes out.
    pub fn to_vec(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len.min(self.len())];
        self.read(0, &mut out);
        out
    }
}

impl core::fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("index", &self.index)
            .field("mapping", &self.mapping)
            .finish()
    }
}
