//! Request structures shared by both sides of the privilege boundary.
//!
//! Every request carries [`SENTINEL`] so a caller built against a different
//! layout is rejected instead of misread.

/// Magic value tagging every request.
pub const SENTINEL: u32 = 0xab0d_1d87;

/// Mapping token that selects the register alias instead of a buffer.
pub const REGS_OFFSET: u64 = 0;

/// Size of the register alias window in bytes.
pub const REGS_SIZE: usize = 1024;

/// Upper bound on buffers per allocation.
pub const MAX_BUFFERS: usize = 4096;

/// Transfer direction of one engine channel.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Memory to stream (MM2S).
    ToDevice = 0,
    /// Stream to memory (S2MM).
    FromDevice = 1,
}

impl Direction {
    /// Decode the raw request value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::ToDevice),
            1 => Some(Self::FromDevice),
            _ => None,
        }
    }

    /// Slot index in per-engine tables.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Hardware channel name.
    pub fn name(self) -> &'static str {
        match self {
            Self::ToDevice => "mm2s",
            Self::FromDevice => "s2mm",
        }
    }
}

/// Bind a connection to one channel of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupRequest {
    pub sentinel: u32,
    pub engine: usize,
    /// Raw [`Direction`] value.
    pub direction: u32,
}

impl SetupRequest {
    pub fn new(engine: usize, direction: Direction) -> Self {
        Self {
            sentinel: SENTINEL,
            engine,
            direction: direction as u32,
        }
    }
}

/// One block of an allocation: size in, physical address out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferRecord {
    pub bytes: usize,
    pub paddr: u64,
}

impl BufferRecord {
    pub fn with_size(bytes: usize) -> Self {
        Self { bytes, paddr: 0 }
    }
}

/// Allocate data buffers plus the descriptor ring block.
///
/// Sizes are filled in by the caller; physical addresses are filled in by
/// the privileged side on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocRequest {
    pub sentinel: u32,
    pub buffers: Vec<BufferRecord>,
    pub ring: BufferRecord,
}

impl AllocRequest {
    /// Request `num_buffers` buffers of `buffer_size` bytes and a ring
    /// block of `ring_bytes`.
    pub fn new(num_buffers: usize, buffer_size: usize, ring_bytes: usize) -> Self {
        Self {
            sentinel: SENTINEL,
            buffers: vec![BufferRecord::with_size(buffer_size); num_buffers],
            ring: BufferRecord::with_size(ring_bytes),
        }
    }

    #[inline]
    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }
}

/// Block until the descriptor at `index` is complete or the timeout expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRequest {
    pub sentinel: u32,
    pub index: usize,
    pub timeout_us: u64,
}

impl WaitRequest {
    pub fn new(index: usize, timeout_us: u64) -> Self {
        Self {
            sentinel: SENTINEL,
            index,
            timeout_us,
        }
    }
}
