//! Channel state machine.
//!
//! One direction of one engine: its connection to the privileged side, its
//! register block, and once allocated, its ring and buffers.
//!
//! ```text
//!  Empty ──alloc──> Allocated ──init──> Running ──halt──> Halted
//!    ^                  ^                  │                │
//!    │                  └──────reset───────┼── Faulted <────┘ (halt timeout)
//!    └──────────────────free───────────────┘ (refused while Running)
//! ```
//!
//! Lifecycle operations take `&mut self`. The streaming operations (`wait`,
//! `acquire`, `release`) take `&self` and may run from several threads.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use sgdma_kernel::abi::MAX_BUFFERS;
use sgdma_kernel::desc::{DescControl, Descriptor, APP_COUNT, DESC_SIZE, LENGTH_MASK};
use sgdma_kernel::{
    AllocRequest, ChannelRegs, Connection, Direction, DmaStatus, Mapping, Registry, SetupRequest,
    WaitRequest,
};

use crate::buffer::DmaBuffer;
use crate::config::DriverConfig;
use crate::error::{DmaError, Result};
use crate::ring::DescriptorRing;

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No memory allocated.
    Empty,
    /// Ring and buffers allocated and mapped; engine idle.
    Allocated,
    /// Ring linked and engine running.
    Running,
    /// Engine stopped cleanly.
    Halted,
    /// Engine failed to halt; needs an engine reset.
    Faulted,
}

/// Ring plus buffers of an allocated channel.
struct Provision {
    ring: DescriptorRing,
    buffers: Vec<DmaBuffer>,
    buffer_size: usize,
}

/// One DMA channel.
pub struct Channel {
    direction: Direction,
    engine: usize,
    config: DriverConfig,
    regs: ChannelRegs,
    state: ChannelState,
    provision: Option<Provision>,
    // Declared last: mappings above are dropped before the connection
    // releases the allocation.
    conn: Connection,
}

impl Channel {
    /// Open a channel on `engine` of `registry`.
    pub fn open(
        registry: &Arc<Registry>,
        engine: usize,
        direction: Direction,
        config: DriverConfig,
    ) -> Result<Self> {
        let mut conn = registry.open();
        conn.setup(&SetupRequest::new(engine, direction))?;
        let window = conn.mmap_registers()?;
        debug!("sgdma: engine {} {} channel open", engine, direction.name());
        Ok(Self {
            direction,
            engine,
            config,
            regs: ChannelRegs::new(window, direction),
            state: ChannelState::Empty,
            provision: None,
            conn,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn engine(&self) -> usize {
        self.engine
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub(crate) fn regs(&self) -> &ChannelRegs {
        &self.regs
    }

    /// Connection to the privileged side.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Ring size, 0 when not allocated.
    pub fn num_buffers(&self) -> usize {
        self.provision.as_ref().map_or(0, |p| p.ring.len())
    }

    /// Configured buffer size, 0 when not allocated.
    pub fn buffer_size(&self) -> usize {
        self.provision.as_ref().map_or(0, |p| p.buffer_size)
    }

    /// The descriptor ring, when allocated.
    pub fn ring(&self) -> Option<&DescriptorRing> {
        self.provision.as_ref().map(|p| &p.ring)
    }

    pub fn head_index(&self) -> usize {
        self.ring().map_or(0, |r| r.head())
    }

    pub fn tail_index(&self) -> usize {
        self.ring().map_or(0, |r| r.tail())
    }

    pub fn acquired(&self) -> usize {
        self.ring().map_or(0, |r| r.acquired())
    }

    /// Buffer behind `handle`.
    pub fn buffer(&self, handle: usize) -> Option<&DmaBuffer> {
        self.provision.as_ref()?.buffers.get(handle)
    }

    /// Snapshot of the descriptor behind `handle`.
    pub fn descriptor(&self, handle: usize) -> Option<Descriptor> {
        self.ring()?.descriptor(handle)
    }

    /// Bus address of the descriptor behind `handle`.
    pub fn descriptor_paddr(&self, handle: usize) -> Option<u64> {
        let ring = self.ring()?;
        (handle < ring.len()).then(|| ring.desc_paddr(handle))
    }

    /// Decoded channel status register.
    pub fn status(&self) -> DmaStatus {
        self.regs.status()
    }

    /// Report any engine error bits as `DmaError::Hardware`.
    pub fn check_errors(&self) -> Result<()> {
        let status = self.status();
        if status.intersects(DmaStatus::ERRORS) {
            return Err(DmaError::Hardware(status.bits()));
        }
        Ok(())
    }

    fn provision(&self) -> Result<&Provision> {
        self.provision
            .as_ref()
            .ok_or(DmaError::Protocol("channel not allocated"))
    }

    fn running(&self) -> Result<&Provision> {
        if self.state != ChannelState::Running {
            return Err(DmaError::Protocol("channel not running"));
        }
        self.provision()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Allocate `num_buffers` buffers of `buffer_size` bytes plus the ring,
    /// and map them.
    ///
    /// A failure at any step leaves nothing allocated or mapped.
    pub fn alloc(&mut self, num_buffers: usize, buffer_size: usize) -> Result<()> {
        if self.state != ChannelState::Empty {
            return Err(DmaError::Busy);
        }
        if num_buffers == 0
            || num_buffers > MAX_BUFFERS
            || buffer_size == 0
            || buffer_size > LENGTH_MASK as usize
        {
            return Err(DmaError::Protocol("invalid ring geometry"));
        }

        let ring_bytes = num_buffers * DESC_SIZE;
        let mut req = AllocRequest::new(num_buffers, buffer_size, ring_bytes);
        self.conn.alloc(&mut req)?;

        let (ring, buffers) = match self.map_allocation(&req) {
            Ok(mapped) => mapped,
            Err(e) => {
                warn!(
                    "sgdma: {} mapping failed ({}), rolling back",
                    self.direction.name(),
                    e
                );
                if let Err(e) = self.conn.free() {
                    warn!("sgdma: rollback free failed: {}", e);
                }
                return Err(DmaError::Allocation);
            }
        };

        self.provision = Some(Provision {
            ring: DescriptorRing::new(ring, num_buffers),
            buffers,
            buffer_size,
        });
        self.state = ChannelState::Allocated;
        info!(
            "sgdma: engine {} {} allocated {} x {} bytes",
            self.engine,
            self.direction.name(),
            num_buffers,
            buffer_size
        );
        Ok(())
    }

    fn map_allocation(
        &self,
        req: &AllocRequest,
    ) -> core::result::Result<(Mapping, Vec<DmaBuffer>), sgdma_kernel::KernelError> {
        let ring = self.conn.mmap(req.ring.paddr, req.ring.bytes)?;
        let mut buffers = Vec::with_capacity(req.num_buffers());
        for (i, record) in req.buffers.iter().enumerate() {
            buffers.push(DmaBuffer::new(self.conn.mmap(record.paddr, record.bytes)?, i));
        }
        Ok((ring, buffers))
    }

    /// Link the ring, program the engine and start it.
    ///
    /// # Arguments
    ///
    /// * `release_initial` - FromDevice: hand every buffer to hardware now.
    ///   ToDevice: give every buffer to the caller for filling.
    pub fn init(&mut self, release_initial: bool) -> Result<()> {
        match self.state {
            ChannelState::Allocated | ChannelState::Halted => {}
            ChannelState::Empty => return Err(DmaError::Protocol("channel not allocated")),
            ChannelState::Running => return Err(DmaError::Busy),
            ChannelState::Faulted => return Err(DmaError::Protocol("channel faulted")),
        }
        if !self.status().contains(DmaStatus::SG_INCLUDED) {
            return Err(DmaError::Capability);
        }

        let provision = self.provision()?;
        provision.ring.link(&provision.buffers);
        let first = provision.ring.desc_paddr(0);
        self.regs.set_current(first);
        self.regs.set_tail(first);
        self.regs.start(self.config.irq_coalesce, self.config.irq_delay);
        self.state = ChannelState::Running;
        info!(
            "sgdma: engine {} {} running ({} descriptors)",
            self.engine,
            self.direction.name(),
            self.num_buffers()
        );

        if release_initial {
            match self.direction {
                Direction::FromDevice => {
                    for handle in 0..self.num_buffers() {
                        self.release(handle, 0)?;
                    }
                }
                Direction::ToDevice => {
                    if let Some(p) = &self.provision {
                        p.ring.clear_acquired();
                    }
                }
            }
        }
        Ok(())
    }

    /// Stop the engine and wait for it to report halted.
    ///
    /// Running out of polls leaves the channel `Faulted`.
    pub fn halt(&mut self) -> Result<()> {
        if self.regs.halt(self.config.halt_loop).is_err() {
            warn!(
                "sgdma: engine {} {} did not halt within {} polls",
                self.engine,
                self.direction.name(),
                self.config.halt_loop
            );
            self.state = ChannelState::Faulted;
            return Err(DmaError::Timeout);
        }
        if self.state == ChannelState::Running {
            self.state = ChannelState::Halted;
        }
        info!("sgdma: engine {} {} halted", self.engine, self.direction.name());
        Ok(())
    }

    /// Unmap and release the ring and buffers.
    pub fn free(&mut self) -> Result<()> {
        match self.state {
            ChannelState::Running => return Err(DmaError::Busy),
            ChannelState::Empty => return Ok(()),
            _ => {}
        }
        self.provision = None;
        self.conn.free()?;
        self.state = ChannelState::Empty;
        info!("sgdma: engine {} {} freed", self.engine, self.direction.name());
        Ok(())
    }

    /// Engine was reset underneath this channel.
    pub(crate) fn on_reset(&mut self) {
        self.state = match (&self.provision, self.state) {
            (_, ChannelState::Empty) | (None, _) => ChannelState::Empty,
            _ => ChannelState::Allocated,
        };
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STREAMING
    // ═══════════════════════════════════════════════════════════════════════

    /// Wait for the descriptor at head to complete.
    ///
    /// A zero timeout never blocks.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let provision = self.running()?;
        let ring = &provision.ring;
        if ring.is_full() {
            return Err(DmaError::Claimed);
        }
        let head = ring.head();
        if ring.is_complete(head) {
            return Ok(());
        }
        if !timeout.is_zero() {
            let timeout_us = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
            self.conn.wait(&WaitRequest::new(head, timeout_us))?;
        }
        if ring.is_complete(head) {
            Ok(())
        } else {
            Err(DmaError::Timeout)
        }
    }

    /// Take the next completed buffer.
    ///
    /// # Returns
    ///
    /// `(handle, length)`: FromDevice reports the bytes received,
    /// ToDevice the full buffer size.
    pub fn acquire(&self) -> Result<(usize, usize)> {
        let provision = self.running()?;
        let handle = provision.ring.acquire()?;
        let length = match self.direction {
            Direction::FromDevice => {
                let length = (provision.ring.status(handle) & LENGTH_MASK) as usize;
                if length > provision.buffer_size {
                    warn!(
                        "sgdma: s2mm descriptor {} reports {} bytes in a {} byte buffer",
                        handle, length, provision.buffer_size
                    );
                }
                length
            }
            Direction::ToDevice => provision.buffer_size,
        };
        Ok((handle, length))
    }

    /// Give a held buffer back to the engine.
    ///
    /// `length` is the number of bytes to send (ToDevice only).
    pub fn release(&self, handle: usize, length: usize) -> Result<()> {
        let provision = self.running()?;
        let control = match self.direction {
            Direction::ToDevice => {
                if length > provision.buffer_size {
                    return Err(DmaError::Protocol("length exceeds buffer"));
                }
                length as u32 | DescControl::SOP.bits() | DescControl::EOP.bits()
            }
            Direction::FromDevice => provision.buffer_size as u32,
        };
        provision
            .ring
            .release(handle, control, |paddr| self.regs.set_tail(paddr))?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SIDEBAND
    // ═══════════════════════════════════════════════════════════════════════

    /// Set application word `which` of the descriptor behind `handle`.
    pub fn set_app_field(&self, handle: usize, which: usize, value: u32) -> Result<()> {
        let provision = self.provision()?;
        if handle >= provision.ring.len() || which >= APP_COUNT {
            return Err(DmaError::Protocol("app field out of range"));
        }
        provision.ring.set_app(handle, which, value);
        Ok(())
    }

    /// Read application word `which` of the descriptor behind `handle`.
    pub fn app_field(&self, handle: usize, which: usize) -> Result<u32> {
        let provision = self.provision()?;
        if handle >= provision.ring.len() || which >= APP_COUNT {
            return Err(DmaError::Protocol("app field out of range"));
        }
        Ok(provision.ring.app(handle, which))
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.state == ChannelState::Running {
            warn!(
                "sgdma: engine {} {} dropped while running, halting",
                self.engine,
                self.direction.name()
            );
            if self.regs.halt(self.config.halt_loop).is_err() {
                warn!(
                    "sgdma: engine {} {} did not halt within {} polls",
                    self.engine,
                    self.direction.name(),
                    self.config.halt_loop
                );
            }
        }
    }
}

impl core::fmt::Debug for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel")
            .field("engine", &self.engine)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("num_buffers", &self.num_buffers())
            .field("buffer_size", &self.buffer_size())
            .finish()
    }
}
