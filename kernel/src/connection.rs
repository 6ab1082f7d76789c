//! Per-caller connection to the privileged side.
//!
//! A connection is bound to one channel of one engine with a setup request,
//! then allocates, maps, waits on and frees that channel's memory. Dropping
//! a connection force-frees anything it still owns.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use sgdma_pool::CoherentBlock;

use crate::abi::{AllocRequest, Direction, SetupRequest, WaitRequest, MAX_BUFFERS, REGS_OFFSET, SENTINEL};
use crate::desc::DescView;
use crate::error::{KernelError, KernelResult};
use crate::mapping::{AddressSpace, Mapping};
use crate::registry::{EngineEntry, Registry, SlotAlloc};
use crate::regs::RegisterWindow;

struct Binding {
    engine: Arc<EngineEntry>,
    direction: Direction,
}

/// An open connection.
pub struct Connection {
    id: u64,
    registry: Arc<Registry>,
    binding: Option<Binding>,
    space: Arc<AddressSpace>,
}

#[inline]
fn check_sentinel(sentinel: u32) -> KernelResult<()> {
    if sentinel != SENTINEL {
        warn!("sgdma: bad sentinel {:#x}", sentinel);
        return Err(KernelError::InvalidArgument);
    }
    Ok(())
}

impl Connection {
    pub(crate) fn new(id: u64, registry: Arc<Registry>) -> Self {
        let config = registry.config();
        let space = Arc::new(AddressSpace::new(config.user_vm_base, config.user_vm_size));
        Self {
            id,
            registry,
            binding: None,
            space,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bound engine index, if any.
    pub fn engine(&self) -> Option<usize> {
        self.binding.as_ref().map(|b| b.engine.index)
    }

    /// Bound direction, if any.
    pub fn direction(&self) -> Option<Direction> {
        self.binding.as_ref().map(|b| b.direction)
    }

    /// Caller address window of this connection.
    pub fn address_space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    fn bound(&self) -> KernelResult<&Binding> {
        self.binding.as_ref().ok_or(KernelError::NotBound)
    }

    fn owns_allocation(&self) -> bool {
        match &self.binding {
            Some(b) => b.engine.slots.lock()[b.direction.index()]
                .as_ref()
                .is_some_and(|s| s.owner == self.id),
            None => false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // REQUESTS
    // ═══════════════════════════════════════════════════════════════════════

    /// Bind to one channel of one engine.
    pub fn setup(&mut self, req: &SetupRequest) -> KernelResult<()> {
        check_sentinel(req.sentinel)?;
        let direction = Direction::from_raw(req.direction).ok_or(KernelError::InvalidArgument)?;
        let engine = self.registry.engine(req.engine).ok_or(KernelError::NoDevice)?;
        if self.owns_allocation() {
            return Err(KernelError::Busy);
        }
        debug!(
            "sgdma: connection {} bound to engine {} {}",
            self.id,
            engine.index,
            direction.name()
        );
        self.binding = Some(Binding { engine, direction });
        Ok(())
    }

    /// Allocate the channel's buffers and ring block.
    ///
    /// On success every record's `paddr` is filled in. If the pool runs out
    /// midway, blocks already taken are returned before failing.
    pub fn alloc(&mut self, req: &mut AllocRequest) -> KernelResult<()> {
        check_sentinel(req.sentinel)?;
        let binding = self.bound()?;
        let count = req.num_buffers();
        if count == 0 || count > MAX_BUFFERS || req.ring.bytes == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if req.buffers.iter().any(|b| b.bytes == 0) {
            return Err(KernelError::InvalidArgument);
        }

        let mut slots = binding.engine.slots.lock();
        let slot = &mut slots[binding.direction.index()];
        if slot.is_some() {
            debug!("sgdma: alloc on live {} allocation", binding.direction.name());
            return Err(KernelError::Busy);
        }

        let pool = self.registry.pool();
        let mut taken: Vec<Arc<CoherentBlock>> = Vec::with_capacity(count + 1);
        let mut fail = None;
        for bytes in std::iter::once(req.ring.bytes).chain(req.buffers.iter().map(|b| b.bytes)) {
            match pool.alloc(bytes) {
                Ok(block) => taken.push(block),
                Err(e) => {
                    fail = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = fail {
            warn!(
                "sgdma: {} alloc failed after {} of {} blocks ({}), rolling back",
                binding.direction.name(),
                taken.len(),
                count + 1,
                e
            );
            for block in &taken {
                // Blocks were just allocated; freeing cannot miss
                let _ = pool.free(block.paddr());
            }
            return Err(KernelError::NoMemory);
        }

        let ring = taken.remove(0);
        req.ring.paddr = ring.paddr();
        for (record, block) in req.buffers.iter_mut().zip(taken.iter()) {
            record.paddr = block.paddr();
        }
        info!(
            "sgdma: engine {} {} allocated {} x {} bytes, ring at {:#x}",
            binding.engine.index,
            binding.direction.name(),
            count,
            req.buffers[0].bytes,
            ring.paddr()
        );
        *slot = Some(SlotAlloc {
            owner: self.id,
            buffers: taken,
            ring,
        });
        Ok(())
    }

    /// Release the channel's allocation. Freeing nothing is not an error.
    pub fn free(&mut self) -> KernelResult<()> {
        let binding = self.bound()?;
        let mut slots = binding.engine.slots.lock();
        let slot = &mut slots[binding.direction.index()];
        match slot.as_ref().map(|a| a.owner) {
            Some(owner) if owner != self.id => Err(KernelError::Busy),
            Some(_) => {
                if let Some(alloc) = slot.take() {
                    self.release_blocks(&alloc);
                }
                info!(
                    "sgdma: engine {} {} freed",
                    binding.engine.index,
                    binding.direction.name()
                );
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn release_blocks(&self, alloc: &SlotAlloc) {
        let pool = self.registry.pool();
        for block in std::iter::once(&alloc.ring).chain(alloc.buffers.iter()) {
            if pool.free(block.paddr()).is_err() {
                warn!("sgdma: block {:#x} already gone", block.paddr());
            }
        }
    }

    /// Block until descriptor `index` of the ring completes or the timeout
    /// expires.
    ///
    /// Succeeds either way; the caller re-checks the descriptor.
    pub fn wait(&self, req: &WaitRequest) -> KernelResult<()> {
        check_sentinel(req.sentinel)?;
        let binding = self.bound()?;
        let ring = {
            let slots = binding.engine.slots.lock();
            let alloc = slots[binding.direction.index()]
                .as_ref()
                .ok_or(KernelError::InvalidArgument)?;
            if req.index >= alloc.buffers.len() {
                return Err(KernelError::InvalidArgument);
            }
            Arc::clone(&alloc.ring)
        };

        let done = binding
            .engine
            .queue
            .wait_until(Duration::from_micros(req.timeout_us), || {
                DescView::at(&ring, req.index).is_complete()
            });
        debug!(
            "sgdma: wait {} desc {} -> {}",
            binding.direction.name(),
            req.index,
            if done { "complete" } else { "timeout" }
        );
        Ok(())
    }

    /// Map a block of this connection's allocation, selected by its
    /// physical address.
    pub fn mmap(&self, token: u64, len: usize) -> KernelResult<Mapping> {
        if token == REGS_OFFSET {
            return Err(KernelError::InvalidArgument);
        }
        let binding = self.bound()?;
        let block = {
            let slots = binding.engine.slots.lock();
            let alloc = slots[binding.direction.index()]
                .as_ref()
                .filter(|a| a.owner == self.id)
                .ok_or(KernelError::InvalidArgument)?;
            Arc::clone(alloc.block_at(token).ok_or(KernelError::InvalidArgument)?)
        };
        if len == 0 || len > block.len() {
            return Err(KernelError::InvalidArgument);
        }
        self.space.map(block, len).ok_or(KernelError::NoMemory)
    }

    /// Map the engine's register window.
    pub fn mmap_registers(&self) -> KernelResult<Arc<dyn RegisterWindow>> {
        let binding = self.bound()?;
        Ok(Arc::clone(&binding.engine.window))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(binding) = &self.binding {
            let leaked = {
                let mut slots = binding.engine.slots.lock();
                let slot = &mut slots[binding.direction.index()];
                if slot.as_ref().is_some_and(|s| s.owner == self.id) {
                    slot.take()
                } else {
                    None
                }
            };
            if let Some(alloc) = leaked {
                warn!(
                    "sgdma: connection {} closed with live {} allocation, force-freeing",
                    self.id,
                    binding.direction.name()
                );
                self.release_blocks(&alloc);
            }
        }
        debug!("sgdma: connection {} closed", self.id);
    }
}
