//! Scatter/gather descriptor layout.
//!
//! AXI DMA v7.1 buffer descriptor: 64 bytes, 64-byte aligned, little-endian
//! words at fixed offsets. Descriptors are never overlaid on memory; they
//! are encoded and decoded word by word.
//!
//! ```text
//! 0x00 NXTDESC      0x04 NXTDESC_MSB
//! 0x08 BUFFER_ADDR  0x0C BUFFER_ADDR_MSB
//! 0x10 reserved     0x14 reserved
//! 0x18 CONTROL      0x1C STATUS
//! 0x20 APP0 .. 0x30 APP4
//! ```

use bitflags::bitflags;
use sgdma_pool::CoherentBlock;

// ═══════════════════════════════════════════════════════════════════════════
// LAYOUT
// ═══════════════════════════════════════════════════════════════════════════

/// Size of one descriptor in bytes.
pub const DESC_SIZE: usize = 64;

/// Required descriptor alignment.
pub const DESC_ALIGN: usize = 64;

pub const NEXT_OFFSET: usize = 0x00;
pub const NEXT_MSB_OFFSET: usize = 0x04;
pub const BUF_ADDR_OFFSET: usize = 0x08;
pub const BUF_ADDR_MSB_OFFSET: usize = 0x0C;
pub const CONTROL_OFFSET: usize = 0x18;
pub const STATUS_OFFSET: usize = 0x1C;
pub const APP_OFFSET: usize = 0x20;

/// Number of sideband application words.
pub const APP_COUNT: usize = 5;

/// Length field mask for both control and status (23 bits).
pub const LENGTH_MASK: u32 = 0x007F_FFFF;

bitflags! {
    /// Descriptor control word flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescControl: u32 {
        /// Start of packet.
        const SOP = 1 << 27;
        /// End of packet.
        const EOP = 1 << 26;
    }
}

bitflags! {
    /// Descriptor status word flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescStatus: u32 {
        /// Transfer complete; software owns the descriptor.
        const COMPLETE = 1 << 31;
        const DEC_ERR = 1 << 30;
        const SLV_ERR = 1 << 29;
        const INT_ERR = 1 << 28;
        /// S2MM only: first buffer of a received frame.
        const RX_SOF = 1 << 27;
        /// S2MM only: last buffer of a received frame.
        const RX_EOF = 1 << 26;

        const ERRORS = Self::DEC_ERR.bits() | Self::SLV_ERR.bits() | Self::INT_ERR.bits();
    }
}

/// Byte offset of descriptor `index` within the ring block.
#[inline]
pub const fn desc_offset(index: usize) -> usize {
    index * DESC_SIZE
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORD
// ═══════════════════════════════════════════════════════════════════════════

/// Decoded descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub next: u32,
    pub buf_addr: u32,
    pub control: u32,
    pub status: u32,
    pub app: [u32; APP_COUNT],
}

impl Descriptor {
    /// Encode into the on-bus byte layout.
    pub fn encode(&self) -> [u8; DESC_SIZE] {
        let mut out = [0u8; DESC_SIZE];
        put(&mut out, NEXT_OFFSET, self.next);
        put(&mut out, BUF_ADDR_OFFSET, self.buf_addr);
        put(&mut out, CONTROL_OFFSET, self.control);
        put(&mut out, STATUS_OFFSET, self.status);
        for (i, word) in self.app.iter().enumerate() {
            put(&mut out, APP_OFFSET + i * 4, *word);
        }
        out
    }

    /// Decode from the on-bus byte layout.
    ///
    /// Returns `None` if fewer than `DESC_SIZE` bytes are supplied.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < DESC_SIZE {
            return None;
        }
        let mut app = [0u32; APP_COUNT];
        for (i, word) in app.iter_mut().enumerate() {
            *word = get(bytes, APP_OFFSET + i * 4);
        }
        Some(Self {
            next: get(bytes, NEXT_OFFSET),
            buf_addr: get(bytes, BUF_ADDR_OFFSET),
            control: get(bytes, CONTROL_OFFSET),
            status: get(bytes, STATUS_OFFSET),
            app,
        })
    }

    /// Status flags.
    pub fn status_flags(&self) -> DescStatus {
        DescStatus::from_bits_truncate(self.status)
    }

    /// Ownership bit.
    pub fn is_complete(&self) -> bool {
        self.status_flags().contains(DescStatus::COMPLETE)
    }

    /// Transferred length (low 23 bits of status).
    pub fn transferred(&self) -> usize {
        (self.status & LENGTH_MASK) as usize
    }
}

fn put(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get(buf: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(word)
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-PLACE VIEW
// ═══════════════════════════════════════════════════════════════════════════

/// Word-level access to one descriptor inside coherent memory.
///
/// Each accessor touches exactly one 32-bit word, so a status update from
/// the engine is never observed half written.
#[derive(Clone, Copy)]
pub struct DescView<'a> {
    block: &'a CoherentBlock,
    base: usize,
}

impl<'a> DescView<'a> {
    /// View the descriptor at byte offset `base` of `block`.
    pub fn new(block: &'a CoherentBlock, base: usize) -> Self {
        Self { block, base }
    }

    /// View descriptor `index` of a ring block.
    pub fn at(block: &'a CoherentBlock, index: usize) -> Self {
        Self::new(block, desc_offset(index))
    }

    /// Physical address of this descriptor.
    pub fn paddr(&self) -> u64 {
        self.block.paddr() + self.base as u64
    }

    pub fn next(&self) -> u32 {
        self.block.read_u32(self.base + NEXT_OFFSET)
    }

    pub fn set_next(&self, paddr: u32) {
        self.block.write_u32(self.base + NEXT_OFFSET, paddr);
        self.block.write_u32(self.base + NEXT_MSB_OFFSET, 0);
    }

    pub fn buf_addr(&self) -> u32 {
        self.block.read_u32(self.base + BUF_ADDR_OFFSET)
    }

    pub fn set_buf_addr(&self, paddr: u32) {
        self.block.write_u32(self.base + BUF_ADDR_OFFSET, paddr);
        self.block.write_u32(self.base + BUF_ADDR_MSB_OFFSET, 0);
    }

    pub fn control(&self) -> u32 {
        self.block.read_u32(self.base + CONTROL_OFFSET)
    }

    pub fn set_control(&self, value: u32) {
        self.block.write_u32(self.base + CONTROL_OFFSET, value);
    }

    pub fn status(&self) -> u32 {
        self.block.read_u32(self.base + STATUS_OFFSET)
    }

    pub fn set_status(&self, value: u32) {
        self.block.write_u32(self.base + STATUS_OFFSET, value);
    }

    /// Ownership bit.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.status() & DescStatus::COMPLETE.bits() != 0
    }

    /// Sideband word `which`; out-of-range reads return 0.
    pub fn app(&self, which: usize) -> u32 {
        if which >= APP_COUNT {
            return 0;
        }
        self.block.read_u32(self.base + APP_OFFSET + which * 4)
    }

    /// Set sideband word `which`; out-of-range writes are dropped.
    pub fn set_app(&self, which: usize, value: u32) {
        if which < APP_COUNT {
            self.block.write_u32(self.base + APP_OFFSET + which * 4, value);
        }
    }

    /// Snapshot the whole descriptor.
    pub fn load(&self) -> Descriptor {
        let mut app = [0u32; APP_COUNT];
        for (i, word) in app.iter_mut().enumerate() {
            *word = self.app(i);
        }
        Descriptor {
            next: self.next(),
            buf_addr: self.buf_addr(),
            control: self.control(),
            status: self.status(),
            app,
        }
    }

    /// Store every field. Status is written last.
    pub fn store(&self, desc: &Descriptor) {
        self.set_next(desc.next);
        self.set_buf_addr(desc.buf_addr);
        self.set_control(desc.control);
        for (i, word) in desc.app.iter().enumerate() {
            self.set_app(i, *word);
        }
        self.set_status(desc.status);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
