//! Coherent memory block.
//!
//! A block is a page-granular run of words shared between software and the
//! DMA engine. Storage is `AtomicU32` so every 32-bit access is whole; byte
//! accessors are built on top of the words in little-endian order, matching
//! the bus byte order of the engine.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

/// A zero-initialized coherent block at a fixed physical address.
pub struct CoherentBlock {
    paddr: u64,
    words: Box<[AtomicU32]>,
}

impl CoherentBlock {
    /// Create a zeroed block of `len` bytes at `paddr`.
    ///
    /// `len` is rounded up to a whole word.
    pub(crate) fn zeroed(paddr: u64, len: usize) -> Self {
        let count = (len + 3) / 4;
        let words: Vec<AtomicU32> = (0..count).map(|_| AtomicU32::new(0)).collect();
        Self {
            paddr,
            words: words.into_boxed_slice(),
        }
    }

    /// Physical (bus) address of the first byte.
    #[inline]
    pub fn paddr(&self) -> u64 {
        self.paddr
    }

    /// Size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.words.len() * 4
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Check whether `paddr` falls inside this block.
    pub fn contains(&self, paddr: u64) -> bool {
        paddr >= self.paddr && paddr < self.paddr + self.len() as u64
    }

    /// Read the 32-bit word at byte `offset`.
    ///
    /// `offset` must be word aligned. Out-of-range reads return 0.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0, "unaligned word read at {:#x}", offset);
        self.words
            .get(offset / 4)
            .map_or(0, |w| w.load(Ordering::Acquire))
    }

    /// Write the 32-bit word at byte `offset`.
    ///
    /// `offset` must be word aligned. Out-of-range writes are dropped.
    #[inline]
    pub fn write_u32(&self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0, "unaligned word write at {:#x}", offset);
        if let Some(w) = self.words.get(offset / 4) {
            w.store(value, Ordering::Release);
        }
    }

    /// Atomically set bits in the word at `offset`, returning the old value.
    pub fn fetch_or_u32(&self, offset: usize, bits: u32) -> u32 {
        self.words
            .get(offset / 4)
            .map_or(0, |w| w.fetch_or(bits, Ordering::AcqRel))
    }

    /// Atomically clear bits in the word at `offset`, returning the old value.
    pub fn fetch_and_u32(&self, offset: usize, mask: u32) -> u32 {
        self.words
            .get(offset / 4)
            .map_or(0, |w| w.fetch_and(mask, Ordering::AcqRel))
    }

    /// Copy bytes starting at `offset` into `buf`.
    ///
    /// # Returns
    ///
    /// Number of bytes copied; short when the block ends first.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> usize {
        let avail = self.len().saturating_sub(offset);
        let count = buf.len().min(avail);
        for (i, out) in buf.iter_mut().take(count).enumerate() {
            let at = offset + i;
            let word = self.words[at / 4].load(Ordering::Acquire);
            *out = (word >> ((at % 4) * 8)) as u8;
        }
        count
    }

    /// Copy `data` into the block starting at `offset`.
    ///
    /// # Returns
    ///
    /// Number of bytes copied; short when the block ends first.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> usize {
        let avail = self.len().saturating_sub(offset);
        let count = data.len().min(avail);
        let mut at = offset;
        let end = offset + count;
        let mut src = data.iter();

        while at < end {
            let index = at / 4;
            let lane = at % 4;
            let span = (4 - lane).min(end - at);

            if lane == 0 && span == 4 {
                let mut bytes = [0u8; 4];
                for b in bytes.iter_mut() {
                    *b = src.next().copied().unwrap_or(0);
                }
                self.words[index].store(u32::from_le_bytes(bytes), Ordering::Release);
            } else {
                // Partial word: merge lane by lane
                let mut clear = 0u32;
                let mut set = 0u32;
                for k in 0..span {
                    let shift = (lane + k) * 8;
                    clear |= 0xFF << shift;
                    set |= (src.next().copied().unwrap_or(0) as u32) << shift;
                }
                let w = &self.words[index];
                w.fetch_and(!clear, Ordering::AcqRel);
                w.fetch_or(set, Ordering::AcqRel);
            }
            at += span;
        }
        count
    }

    /// Zero the whole block.
    pub fn zero(&self) {
        for w in self.words.iter() {
            w.store(0, Ordering::Release);
        }
    }
}

impl core::fmt::Debug for CoherentBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CoherentBlock")
            .field("paddr", &format_args!("{:#x}", self.paddr))
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_on_creation() {
        let block = CoherentBlock::zeroed(0x1000, 64);
        assert_eq!(block.len(), 64);
        for off in (0..64).step_by(4) {
            assert_eq!(block.read_u32(off), 0);
        }
    }

    #[test]
    fn test_word_access() {
        let block = CoherentBlock::zeroed(0x1000, 16);
        block.write_u32(4, 0x1234_5678);
        assert_eq!(block.read_u32(4), 0x1234_5678);
        assert_eq!(block.fetch_or_u32(4, 0x8000_0000), 0x1234_5678);
        assert_eq!(block.read_u32(4), 0x9234_5678);
        block.fetch_and_u32(4, !0x8000_0000);
        assert_eq!(block.read_u32(4), 0x1234_5678);
        // Out of range is inert
        block.write_u32(64, 1);
        assert_eq!(block.read_u32(64), 0);
    }

    #[test]
    fn test_byte_access_is_little_endian() {
        let block = CoherentBlock::zeroed(0x1000, 16);
        block.write_u32(0, 0x4433_2211);
        let mut buf = [0u8; 4];
        assert_eq!(block.read_bytes(0, &mut buf), 4);
        assert_eq!(buf, [0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_unaligned_write_preserves_neighbours() {
        let block = CoherentBlock::zeroed(0x1000, 16);
        block.write_u32(0, 0xAAAA_AAAA);
        block.write_u32(4, 0xBBBB_BBBB);
        assert_eq!(block.write_bytes(3, &[1, 2]), 2);
        assert_eq!(block.read_u32(0), 0x01AA_AAAA);
        assert_eq!(block.read_u32(4), 0xBBBB_BB02);
    }

    #[test]
    fn test_short_copy_at_end() {
        let block = CoherentBlock::zeroed(0x1000, 8);
        assert_eq!(block.write_bytes(6, &[9, 9, 9, 9]), 2);
        let mut buf = [0u8; 8];
        assert_eq!(block.read_bytes(4, &mut buf), 4);
        assert_eq!(&buf[..4], &[0, 0, 9, 9]);
        assert_eq!(block.read_bytes(100, &mut buf), 0);
    }
}
