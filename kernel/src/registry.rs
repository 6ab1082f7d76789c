//! Engine registry.
//!
//! Built once at startup from a [`RegistryConfig`]; owns the coherent pool
//! and the table of engines. Callers reach the privileged side only through
//! [`Connection`]s opened from it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use sgdma_pool::{CoherentBlock, CoherentPool, PhysRegion, PAGE_SIZE};
use spin::Mutex;

use crate::abi::Direction;
use crate::connection::Connection;
use crate::error::{KernelError, KernelResult};
use crate::irq::EngineIrq;
use crate::mapping::USER_VM_BASE;
use crate::notify::WaitQueue;
use crate::regs::RegisterWindow;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════

/// Default coherent window: 16 MiB at 256 MiB.
pub const DEFAULT_POOL_BASE: u64 = 0x1000_0000;
pub const DEFAULT_POOL_SIZE: usize = 16 * 1024 * 1024;

/// Default caller address window per connection.
pub const DEFAULT_USER_VM_SIZE: u64 = 64 * 1024 * 1024;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Physical window for the coherent pool.
    pub pool: PhysRegion,
    /// Base of each connection's caller address window.
    pub user_vm_base: u64,
    /// Size of each connection's caller address window.
    pub user_vm_size: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pool: PhysRegion::new(DEFAULT_POOL_BASE, DEFAULT_POOL_SIZE),
            user_vm_base: USER_VM_BASE,
            user_vm_size: DEFAULT_USER_VM_SIZE,
        }
    }
}

impl RegistryConfig {
    /// Set the coherent pool window.
    pub fn pool(mut self, base: u64, size: usize) -> Self {
        self.pool = PhysRegion::new(base, size);
        self
    }

    /// Set the per-connection caller address window size.
    pub fn user_vm_size(mut self, size: u64) -> Self {
        self.user_vm_size = size;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE TABLE
// ═══════════════════════════════════════════════════════════════════════════

/// A live allocation for one channel.
pub(crate) struct SlotAlloc {
    /// Connection that made the allocation.
    pub owner: u64,
    pub buffers: Vec<Arc<CoherentBlock>>,
    pub ring: Arc<CoherentBlock>,
}

impl SlotAlloc {
    /// Find the block based at `paddr`.
    pub fn block_at(&self, paddr: u64) -> Option<&Arc<CoherentBlock>> {
        std::iter::once(&self.ring)
            .chain(self.buffers.iter())
            .find(|b| b.paddr() == paddr)
    }
}

/// One registered engine.
pub(crate) struct EngineEntry {
    pub index: usize,
    pub window: Arc<dyn RegisterWindow>,
    pub queue: Arc<WaitQueue>,
    pub irq: Arc<EngineIrq>,
    /// Allocation per direction.
    pub slots: Mutex<[Option<SlotAlloc>; 2]>,
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

/// Privileged-side state: pool plus engines.
pub struct Registry {
    config: RegistryConfig,
    pool: Arc<CoherentPool>,
    engines: Mutex<Vec<Arc<EngineEntry>>>,
    next_connection: AtomicU64,
}

impl Registry {
    /// Create a registry and its coherent pool.
    pub fn new(config: RegistryConfig) -> KernelResult<Arc<Self>> {
        if config.user_vm_size < PAGE_SIZE as u64 {
            return Err(KernelError::InvalidArgument);
        }
        let pool = CoherentPool::new(config.pool).map_err(|_| KernelError::InvalidArgument)?;
        info!(
            "sgdma: registry up, pool {:#x}+{:#x}",
            config.pool.base, config.pool.size
        );
        Ok(Arc::new(Self {
            config,
            pool: Arc::new(pool),
            engines: Mutex::new(Vec::new()),
            next_connection: AtomicU64::new(1),
        }))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The coherent pool; the engine reaches memory through it.
    pub fn pool(&self) -> &Arc<CoherentPool> {
        &self.pool
    }

    /// Register an engine's register window.
    ///
    /// # Returns
    ///
    /// The engine index used in setup requests.
    pub fn add_engine(&self, window: Arc<dyn RegisterWindow>) -> usize {
        let mut engines = self.engines.lock();
        let index = engines.len();
        let queue = Arc::new(WaitQueue::new());
        let irq = Arc::new(EngineIrq::new(Arc::clone(&window), Arc::clone(&queue)));
        engines.push(Arc::new(EngineEntry {
            index,
            window,
            queue,
            irq,
            slots: Mutex::new([None, None]),
        }));
        info!("sgdma: engine {} registered", index);
        index
    }

    pub fn engine_count(&self) -> usize {
        self.engines.lock().len()
    }

    pub(crate) fn engine(&self, index: usize) -> Option<Arc<EngineEntry>> {
        self.engines.lock().get(index).cloned()
    }

    /// Interrupt handler for an engine, to be wired to its IRQ line.
    pub fn interrupt_sink(&self, engine: usize) -> Option<Arc<EngineIrq>> {
        self.engine(engine).map(|e| Arc::clone(&e.irq))
    }

    /// Interrupts serviced for an engine.
    pub fn irq_count(&self, engine: usize) -> Option<u64> {
        self.engine(engine).map(|e| e.irq.count())
    }

    /// Whether a channel currently holds an allocation.
    pub fn is_allocated(&self, engine: usize, direction: Direction) -> bool {
        self.engine(engine)
            .map(|e| e.slots.lock()[direction.index()].is_some())
            .unwrap_or(false)
    }

    /// Open a new connection.
    pub fn open(self: &Arc<Self>) -> Connection {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        debug!("sgdma: connection {} opened", id);
        Connection::new(id, Arc::clone(self))
    }
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("pool", &self.pool)
            .field("engines", &self.engine_count())
            .finish()
    }
}
