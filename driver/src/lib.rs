//! Unprivileged control path for AXI scatter/gather DMA.
//!
//! Memory comes from the privileged side (`sgdma-kernel`) through a
//! connection: ring and buffers are allocated there, mapped here, and the
//! engine's register block is mapped for direct programming. Everything on
//! the hot path, acquiring and releasing buffers and moving the tail
//! pointer, happens in this crate without a round trip.
//!
//! ```text
//!   Engine ── tx: Channel ─┐
//!          └─ rx: Channel ─┼── Connection ── Registry (pool, IRQ, wait queue)
//!                          ├── ChannelRegs (mapped register block)
//!                          └── DescriptorRing + DmaBuffer[N] (mapped)
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sgdma::{DriverConfig, Engine};
//! use sgdma_kernel::sim::{SimAxiDma, SimConfig};
//! use sgdma_kernel::{Registry, RegistryConfig};
//!
//! let registry = Registry::new(RegistryConfig::default()).unwrap();
//! let sim = Arc::new(SimAxiDma::new(Arc::clone(registry.pool()), SimConfig::default()));
//! let index = registry.add_engine(sim.clone());
//!
//! let mut engine = Engine::with_config(&registry, index, DriverConfig::for_sim()).unwrap();
//! engine.tx_mut().alloc(8, 2048).unwrap();
//! engine.tx_mut().init(true).unwrap();
//!
//! let tx = engine.tx();
//! let (handle, capacity) = tx.acquire().unwrap();
//! assert_eq!(capacity, 2048);
//! tx.buffer(handle).unwrap().write(0, b"hello");
//! tx.release(handle, 5).unwrap();
//!
//! sim.step();
//! assert_eq!(sim.drain_transmitted()[0].data, b"hello");
//! assert!(tx.wait(Duration::ZERO).is_ok());
//! ```

pub mod buffer;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod ring;

pub use buffer::DmaBuffer;
pub use channel::{Channel, ChannelState};
pub use config::DriverConfig;
pub use engine::Engine;
pub use error::{to_code, DmaError, Result, ResultCode};
pub use ring::DescriptorRing;
pub use sgdma_kernel::Direction;
