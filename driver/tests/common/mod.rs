//! Shared fixture: a registry with one simulated engine.

#![allow(dead_code)]

use std::sync::Arc;

use sgdma::{Channel, DriverConfig, Engine};
use sgdma_kernel::desc::{DescStatus, STATUS_OFFSET};
use sgdma_kernel::sim::{SimAxiDma, SimConfig};
use sgdma_kernel::{Registry, RegistryConfig};

pub struct Rig {
    pub registry: Arc<Registry>,
    pub sim: Arc<SimAxiDma>,
    pub engine: Engine,
}

pub fn rig() -> Rig {
    rig_with(RegistryConfig::default(), SimConfig::default())
}

pub fn rig_with(config: RegistryConfig, sim_config: SimConfig) -> Rig {
    let registry = Registry::new(config).unwrap();
    let sim = Arc::new(SimAxiDma::new(Arc::clone(registry.pool()), sim_config));
    let index = registry.add_engine(sim.clone());
    sim.attach_interrupt(registry.interrupt_sink(index).unwrap());
    let engine = Engine::with_config(&registry, index, DriverConfig::for_sim()).unwrap();
    Rig {
        registry,
        sim,
        engine,
    }
}

/// Write a descriptor's status word the way the engine would.
pub fn set_status(registry: &Registry, channel: &Channel, handle: usize, status: u32) {
    let paddr = channel.descriptor_paddr(handle).unwrap() + STATUS_OFFSET as u64;
    assert!(registry.pool().write_u32(paddr, status));
}

/// Mark a descriptor complete with `len` bytes transferred.
pub fn complete(registry: &Registry, channel: &Channel, handle: usize, len: u32) {
    set_status(registry, channel, handle, DescStatus::COMPLETE.bits() | len);
}

/// Whether the descriptor's ownership bit is set.
pub fn owned_by_software(channel: &Channel, handle: usize) -> bool {
    channel.descriptor(handle).unwrap().is_complete()
}
