//! AXI DMA register map.
//!
//! One register window per engine; MM2S registers start at 0x00 and S2MM
//! registers at 0x30. All accesses are 32-bit.

use std::ptr::NonNull;
use std::sync::Arc;

use bitflags::bitflags;

use crate::abi::Direction;

// ═══════════════════════════════════════════════════════════════════════════
// OFFSETS
// ═══════════════════════════════════════════════════════════════════════════

/// Base of the MM2S register block.
pub const MM2S_BASE: usize = 0x00;
/// Base of the S2MM register block.
pub const S2MM_BASE: usize = 0x30;

/// Control register (relative to channel base).
pub const DMACR: usize = 0x00;
/// Status register.
pub const DMASR: usize = 0x04;
/// Current descriptor pointer.
pub const CURDESC: usize = 0x08;
pub const CURDESC_MSB: usize = 0x0C;
/// Tail descriptor pointer. Writing it while running starts a fetch.
pub const TAILDESC: usize = 0x10;
pub const TAILDESC_MSB: usize = 0x14;

/// Scatter/gather user and cache control (absolute).
pub const SG_CTL: usize = 0x2C;

/// Reset polling bound.
pub const RESET_LOOP: u32 = 1_000_000;
/// Halt polling bound.
pub const HALT_LOOP: u32 = 1_000_000;

/// Interrupt coalesce threshold field position in DMACR.
pub const IRQ_THRESHOLD_SHIFT: u32 = 16;
/// Interrupt delay timeout field position in DMACR.
pub const IRQ_DELAY_SHIFT: u32 = 24;

/// Channel register base for a direction.
#[inline]
pub const fn channel_base(direction: Direction) -> usize {
    match direction {
        Direction::ToDevice => MM2S_BASE,
        Direction::FromDevice => S2MM_BASE,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BITS
// ═══════════════════════════════════════════════════════════════════════════

bitflags! {
    /// DMACR bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaControl: u32 {
        const RUN_STOP = 1 << 0;
        /// Soft reset; resets both channels. Self-clearing.
        const RESET = 1 << 2;
        const KEYHOLE = 1 << 3;
        const CYCLIC = 1 << 4;
        const IOC_IRQ_EN = 1 << 12;
        const DLY_IRQ_EN = 1 << 13;
        const ERR_IRQ_EN = 1 << 14;
        const IRQ_ALL_EN = 0x7000;
        const IRQ_THRESHOLD = 0x00FF_0000;
        const IRQ_DELAY = 0xFF00_0000;
    }
}

bitflags! {
    /// DMASR bits. The IRQ bits are write-one-to-clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaStatus: u32 {
        const HALTED = 1 << 0;
        const IDLE = 1 << 1;
        /// Engine was built with scatter/gather.
        const SG_INCLUDED = 1 << 3;
        const DMA_INT_ERR = 1 << 4;
        const DMA_SLV_ERR = 1 << 5;
        const DMA_DEC_ERR = 1 << 6;
        const SG_INT_ERR = 1 << 8;
        const SG_SLV_ERR = 1 << 9;
        const SG_DEC_ERR = 1 << 10;
        const IOC_IRQ = 1 << 12;
        const DLY_IRQ = 1 << 13;
        const ERR_IRQ = 1 << 14;

        const IRQ_ALL = 0x7000;
        const ERRORS = 0x0770;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WINDOW
// ═══════════════════════════════════════════════════════════════════════════

/// 32-bit register access over an engine's window.
pub trait RegisterWindow: Send + Sync {
    /// Read the register at byte `offset`.
    fn read32(&self, offset: usize) -> u32;
    /// Write the register at byte `offset`.
    fn write32(&self, offset: usize, value: u32);
}

/// Raw volatile access over a mapped register window.
pub struct MmioWindow {
    base: NonNull<u32>,
    len: usize,
}

// SAFETY: register access is volatile and word sized; the creator
// guarantees the mapping outlives the window.
unsafe impl Send for MmioWindow {}
unsafe impl Sync for MmioWindow {}

impl MmioWindow {
    /// Wrap a mapped register window.
    ///
    /// # Safety
    ///
    /// - `base` must point to `len` bytes of mapped device registers (or
    ///   memory standing in for them), 4-byte aligned.
    /// - The mapping must stay valid for the lifetime of the window.
    pub unsafe fn new(base: NonNull<u32>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    fn slot(&self, offset: usize) -> Option<*mut u32> {
        if offset % 4 != 0 || offset + 4 > self.len {
            return None;
        }
        // SAFETY: bounds checked against the mapped length above.
        Some(unsafe { self.base.as_ptr().add(offset / 4) })
    }
}

impl RegisterWindow for MmioWindow {
    fn read32(&self, offset: usize) -> u32 {
        match self.slot(offset) {
            // SAFETY: in-bounds, aligned, mapped for our lifetime.
            Some(p) => unsafe { core::ptr::read_volatile(p) },
            None => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        if let Some(p) = self.slot(offset) {
            // SAFETY: in-bounds, aligned, mapped for our lifetime.
            unsafe { core::ptr::write_volatile(p, value) };
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CHANNEL REGISTERS
// ═══════════════════════════════════════════════════════════════════════════

/// A bounded spin wait ran out of iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegTimeout {
    /// Reset bit never self-cleared.
    Reset,
    /// Channel never reported halted.
    Halt,
}

/// Register block of one channel.
#[derive(Clone)]
pub struct ChannelRegs {
    window: Arc<dyn RegisterWindow>,
    base: usize,
}

impl ChannelRegs {
    pub fn new(window: Arc<dyn RegisterWindow>, direction: Direction) -> Self {
        Self {
            window,
            base: channel_base(direction),
        }
    }

    /// The shared engine window.
    pub fn window(&self) -> &Arc<dyn RegisterWindow> {
        &self.window
    }

    pub fn control(&self) -> DmaControl {
        DmaControl::from_bits_retain(self.window.read32(self.base + DMACR))
    }

    pub fn set_control(&self, value: DmaControl) {
        self.window.write32(self.base + DMACR, value.bits());
    }

    pub fn status(&self) -> DmaStatus {
        DmaStatus::from_bits_retain(self.window.read32(self.base + DMASR))
    }

    /// Clear pending interrupt bits (W1C).
    pub fn ack_irq(&self, bits: DmaStatus) {
        self.window
            .write32(self.base + DMASR, (bits & DmaStatus::IRQ_ALL).bits());
    }

    pub fn set_current(&self, paddr: u64) {
        self.window.write32(self.base + CURDESC, paddr as u32);
        self.window.write32(self.base + CURDESC_MSB, (paddr >> 32) as u32);
    }

    pub fn current(&self) -> u64 {
        self.window.read32(self.base + CURDESC) as u64
            | (self.window.read32(self.base + CURDESC_MSB) as u64) << 32
    }

    /// Program the tail pointer. The MSB half goes first; the LSB write
    /// is what triggers the fetch.
    pub fn set_tail(&self, paddr: u64) {
        self.window.write32(self.base + TAILDESC_MSB, (paddr >> 32) as u32);
        self.window.write32(self.base + TAILDESC, paddr as u32);
    }

    pub fn tail(&self) -> u64 {
        self.window.read32(self.base + TAILDESC) as u64
            | (self.window.read32(self.base + TAILDESC_MSB) as u64) << 32
    }

    /// Set the run bit and interrupt enables.
    ///
    /// # Arguments
    ///
    /// * `coalesce` - Completions per interrupt (0 leaves the field alone)
    /// * `delay` - Delay timeout in engine ticks (0 disables)
    pub fn start(&self, coalesce: u8, delay: u8) {
        let mut ctrl = self.control() | DmaControl::RUN_STOP | DmaControl::IOC_IRQ_EN;
        if coalesce != 0 {
            ctrl.remove(DmaControl::IRQ_THRESHOLD);
            ctrl |= DmaControl::from_bits_retain((coalesce as u32) << IRQ_THRESHOLD_SHIFT);
        }
        if delay != 0 {
            ctrl.remove(DmaControl::IRQ_DELAY);
            ctrl |= DmaControl::from_bits_retain((delay as u32) << IRQ_DELAY_SHIFT)
                | DmaControl::DLY_IRQ_EN;
        }
        self.set_control(ctrl);
    }

    /// Clear the run bit and poll until the channel reports halted.
    pub fn halt(&self, limit: u32) -> Result<(), RegTimeout> {
        self.set_control(self.control() - DmaControl::RUN_STOP);
        for _ in 0..limit {
            if self.status().contains(DmaStatus::HALTED) {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(RegTimeout::Halt)
    }
}

/// Soft-reset the whole engine (both channels).
///
/// Sets the reset bit and polls until the engine clears it.
pub fn reset(window: &dyn RegisterWindow, limit: u32) -> Result<(), RegTimeout> {
    let ctrl = window.read32(MM2S_BASE + DMACR);
    window.write32(MM2S_BASE + DMACR, ctrl | DmaControl::RESET.bits());
    for _ in 0..limit {
        if window.read32(MM2S_BASE + DMACR) & DmaControl::RESET.bits() == 0 {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(RegTimeout::Reset)
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
