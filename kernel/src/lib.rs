//! Privileged side of the scatter/gather DMA driver.
//!
//! Owns the coherent pool and the engine table, hands out connections that
//! allocate and map channel memory, and turns engine interrupts into wakes
//! for blocked waiters. Also carries the pieces both sides agree on: the
//! request structures, the descriptor layout and the register map.
//!
//! # Architecture
//!
//! ```text
//! Registry ── CoherentPool
//!    │
//!    ├── EngineEntry[n] ── RegisterWindow (MmioWindow | SimAxiDma)
//!    │        ├── WaitQueue <── EngineIrq <── interrupt line
//!    │        └── slots[MM2S, S2MM] : live allocation + owner
//!    │
//!    └── open() ──> Connection ── setup / alloc / mmap / wait / free
//!                        └── AddressSpace ──> Mapping
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use sgdma_kernel::{AllocRequest, Direction, Registry, RegistryConfig, SetupRequest};
//! use sgdma_kernel::sim::{SimAxiDma, SimConfig};
//!
//! let registry = Registry::new(RegistryConfig::default()).unwrap();
//! let sim = Arc::new(SimAxiDma::new(Arc::clone(registry.pool()), SimConfig::default()));
//! let engine = registry.add_engine(sim);
//!
//! let mut conn = registry.open();
//! conn.setup(&SetupRequest::new(engine, Direction::FromDevice)).unwrap();
//! let mut req = AllocRequest::new(4, 4096, 4 * 64);
//! conn.alloc(&mut req).unwrap();
//! let ring = conn.mmap(req.ring.paddr, req.ring.bytes).unwrap();
//! assert_eq!(ring.virt_to_phys(ring.vaddr() + 64), Some(req.ring.paddr + 64));
//! ```

pub mod abi;
pub mod connection;
pub mod desc;
pub mod error;
pub mod irq;
pub mod mapping;
pub mod notify;
pub mod registry;
pub mod regs;
pub mod sim;

pub use abi::{AllocRequest, BufferRecord, Direction, SetupRequest, WaitRequest, SENTINEL};
pub use connection::Connection;
pub use desc::{DescView, Descriptor};
pub use error::{KernelError, KernelResult};
pub use irq::{EngineIrq, InterruptSink};
pub use mapping::{AddressSpace, Mapping};
pub use notify::WaitQueue;
pub use registry::{Registry, RegistryConfig};
pub use regs::{ChannelRegs, DmaControl, DmaStatus, MmioWindow, RegisterWindow};
