//! Channel and engine lifecycle: allocation, rollback, halt, reset, free.

mod common;

use common::{rig, rig_with, set_status};
use sgdma::{ChannelState, Direction, DmaError, Engine, ResultCode};
use sgdma_kernel::abi::MAX_BUFFERS;
use sgdma_kernel::desc::DescStatus;
use sgdma_kernel::regs::DMASR;
use sgdma_kernel::sim::SimConfig;
use sgdma_kernel::{
    AllocRequest, DmaStatus, KernelError, RegisterWindow, RegistryConfig, SetupRequest, WaitRequest,
};
use sgdma_pool::PAGE_SIZE;

#[test]
fn test_alloc_maps_ring_and_buffers() {
    let mut rig = rig();
    let tx = rig.engine.tx_mut();
    tx.alloc(8, 1500).unwrap();

    assert_eq!(tx.state(), ChannelState::Allocated);
    assert_eq!(tx.num_buffers(), 8);
    assert_eq!(tx.buffer_size(), 1500);
    for handle in 0..8 {
        let buffer = tx.buffer(handle).unwrap();
        assert_eq!(buffer.index(), handle);
        assert_eq!(buffer.len(), 1500);
        assert_ne!(buffer.paddr(), 0);
        assert!(buffer.paddr() < 1 << 32);
        // Fresh buffers are zeroed
        assert!(buffer.to_vec(1500).iter().all(|b| *b == 0));
    }
    assert!(tx.buffer(8).is_none());
    assert!(rig.registry.is_allocated(0, Direction::ToDevice));
    assert_eq!(tx.connection().address_space().mapping_count(), 9);
}

#[test]
fn test_alloc_rejects_bad_geometry() {
    let mut rig = rig();
    let rx = rig.engine.rx_mut();
    assert!(matches!(rx.alloc(0, 256), Err(DmaError::Protocol(_))));
    assert!(matches!(rx.alloc(4, 0), Err(DmaError::Protocol(_))));
    assert!(matches!(rx.alloc(4, 1 << 23), Err(DmaError::Protocol(_))));
    assert!(matches!(rx.alloc(MAX_BUFFERS + 1, 256), Err(DmaError::Protocol(_))));
    assert!(matches!(rx.alloc(usize::MAX / 32, 256), Err(DmaError::Protocol(_))));
    assert!(!rig.registry.is_allocated(0, Direction::FromDevice));
    assert_eq!(rx.state(), ChannelState::Empty);
}

#[test]
fn test_buffer_address_translation_is_affine() {
    let mut rig = rig();
    let rx = rig.engine.rx_mut();
    rx.alloc(2, 4096).unwrap();
    let buffer = rx.buffer(1).unwrap();

    let (va, pa) = (buffer.vaddr(), buffer.paddr());
    assert_eq!(buffer.virt_to_phys(va), Some(pa));
    assert_eq!(buffer.virt_to_phys(va + 100), Some(pa + 100));
    assert_eq!(buffer.phys_to_virt(pa + 4095), Some(va + 4095));
    assert_eq!(buffer.virt_to_phys(va + 4096), None);
    assert_eq!(buffer.phys_to_virt(pa.wrapping_sub(1)), None);
}

#[test]
fn test_pool_exhaustion_rolls_back() {
    let config = RegistryConfig::default().pool(0x1000_0000, 4 * PAGE_SIZE);
    let mut rig = rig_with(config, SimConfig::default());
    let tx = rig.engine.tx_mut();

    // Ring plus four page-sized buffers needs five pages
    assert_eq!(tx.alloc(4, PAGE_SIZE), Err(DmaError::Allocation));
    assert_eq!(DmaError::Allocation.code(), ResultCode::AllocationError);
    assert_eq!(tx.state(), ChannelState::Empty);
    assert_eq!(rig.registry.pool().used(), 0);
    assert!(!rig.registry.is_allocated(0, Direction::ToDevice));

    // Something that fits still works afterwards
    tx.alloc(3, PAGE_SIZE).unwrap();
}

#[test]
fn test_mapping_failure_rolls_back() {
    let config = RegistryConfig::default().user_vm_size(2 * PAGE_SIZE as u64);
    let mut rig = rig_with(config, SimConfig::default());
    let rx = rig.engine.rx_mut();

    assert_eq!(rx.alloc(4, 256), Err(DmaError::Allocation));
    assert_eq!(rx.state(), ChannelState::Empty);
    assert_eq!(rx.num_buffers(), 0);
    assert_eq!(rig.registry.pool().used(), 0);
    assert_eq!(rx.connection().address_space().mapped_bytes(), 0);
    assert_eq!(rx.connection().address_space().mapping_count(), 0);
    assert!(!rig.registry.is_allocated(0, Direction::FromDevice));
}

#[test]
fn test_init_requires_scatter_gather() {
    let mut rig = rig_with(RegistryConfig::default(), SimConfig::default().sg_capable(false));
    let rx = rig.engine.rx_mut();
    rx.alloc(4, 256).unwrap();
    assert_eq!(rx.init(true), Err(DmaError::Capability));
    assert_eq!(DmaError::Capability.code() as i32, -1);
    assert_eq!(rx.state(), ChannelState::Allocated);
}

#[test]
fn test_init_state_checks() {
    let mut rig = rig();
    let tx = rig.engine.tx_mut();
    assert!(matches!(tx.init(true), Err(DmaError::Protocol(_))));
    tx.alloc(4, 256).unwrap();
    tx.init(true).unwrap();
    assert_eq!(tx.init(true), Err(DmaError::Busy));
}

#[test]
fn test_halt_then_reinit() {
    let mut rig = rig();
    let rx = rig.engine.rx_mut();
    rx.alloc(4, 256).unwrap();
    rx.init(true).unwrap();
    rx.halt().unwrap();
    assert_eq!(rx.state(), ChannelState::Halted);
    assert!(rx.status().contains(DmaStatus::HALTED));

    rx.init(true).unwrap();
    assert_eq!(rx.state(), ChannelState::Running);
    assert_eq!(rx.acquired(), 0);
    assert_eq!(rx.head_index(), 0);
}

#[test]
fn test_halt_timeout_faults_channel() {
    let mut rig = rig_with(RegistryConfig::default(), SimConfig::default().stall_halt(true));
    let tx = rig.engine.tx_mut();
    tx.alloc(4, 256).unwrap();
    tx.init(true).unwrap();

    assert_eq!(tx.halt(), Err(DmaError::Timeout));
    assert_eq!(tx.state(), ChannelState::Faulted);
    assert!(matches!(tx.init(true), Err(DmaError::Protocol(_))));

    // Reset recovers a faulted channel
    rig.sim.set_stall_halt(false);
    rig.engine.reset().unwrap();
    assert_eq!(rig.engine.tx().state(), ChannelState::Allocated);
    rig.engine.tx_mut().init(true).unwrap();
}

#[test]
fn test_reset_timeout() {
    let mut rig = rig_with(RegistryConfig::default(), SimConfig::default().stall_reset(true));
    assert_eq!(rig.engine.reset(), Err(DmaError::Timeout));
    rig.sim.set_stall_reset(false);
    rig.engine.reset().unwrap();
}

#[test]
fn test_reset_refused_while_running() {
    let mut rig = rig();
    rig.engine.rx_mut().alloc(2, 128).unwrap();
    rig.engine.rx_mut().init(true).unwrap();
    assert_eq!(rig.engine.reset(), Err(DmaError::Busy));
    assert_eq!(rig.engine.rx().state(), ChannelState::Running);
}

#[test]
fn test_free_lifecycle() {
    let mut rig = rig();
    let tx = rig.engine.tx_mut();
    tx.alloc(4, 2048).unwrap();
    tx.init(true).unwrap();
    assert_eq!(tx.free(), Err(DmaError::Busy));

    tx.halt().unwrap();
    tx.free().unwrap();
    assert_eq!(tx.state(), ChannelState::Empty);
    assert_eq!(tx.num_buffers(), 0);
    assert!(tx.buffer(0).is_none());
    assert_eq!(tx.connection().address_space().mapped_bytes(), 0);
    assert_eq!(rig.registry.pool().used(), 0);

    // Freeing twice is harmless; allocating again works
    tx.free().unwrap();
    tx.alloc(2, 64).unwrap();
}

#[test]
fn test_drop_force_frees() {
    let rig = rig();
    let registry = rig.registry.clone();
    let mut engine = rig.engine;
    engine.tx_mut().alloc(4, 512).unwrap();
    engine.rx_mut().alloc(4, 512).unwrap();
    engine.rx_mut().init(true).unwrap();
    assert!(registry.pool().used() > 0);

    drop(engine);
    assert_eq!(registry.pool().used(), 0);
    assert!(!registry.is_allocated(0, Direction::ToDevice));
    assert!(!registry.is_allocated(0, Direction::FromDevice));
}

#[test]
fn test_drop_running_channel_that_will_not_halt() {
    let rig = rig_with(RegistryConfig::default(), SimConfig::default().stall_halt(true));
    let registry = rig.registry.clone();
    let mut engine = rig.engine;
    engine.tx_mut().alloc(4, 256).unwrap();
    engine.tx_mut().init(true).unwrap();

    // Halt times out; the allocation is still reclaimed
    drop(engine);
    let status = DmaStatus::from_bits_retain(rig.sim.read32(DMASR));
    assert!(!status.contains(DmaStatus::HALTED));
    assert_eq!(registry.pool().used(), 0);
    assert!(!registry.is_allocated(0, Direction::ToDevice));
}

#[test]
fn test_engine_create_for_missing_engine() {
    let rig = rig();
    assert!(matches!(
        Engine::create(&rig.registry, 7),
        Err(DmaError::Protocol(_))
    ));
}

#[test]
fn test_hardware_error_reported() {
    let mut rig = rig();
    rig.engine.tx_mut().alloc(4, 256).unwrap();
    rig.engine.tx_mut().init(true).unwrap();
    let tx = rig.engine.tx();

    let (handle, _) = tx.acquire().unwrap();
    tx.release(handle, 8).unwrap();
    // Hand the engine a descriptor it does not own
    set_status(&rig.registry, tx, handle, DescStatus::COMPLETE.bits());
    rig.sim.step();

    let status = tx.status();
    assert!(status.contains(DmaStatus::SG_INT_ERR | DmaStatus::HALTED));
    match tx.check_errors() {
        Err(DmaError::Hardware(bits)) => {
            assert_ne!(bits & DmaStatus::SG_INT_ERR.bits(), 0);
        }
        other => panic!("expected hardware error, got {:?}", other),
    }
    assert_eq!(DmaError::Hardware(0).code(), ResultCode::Hardware);
}

#[test]
fn test_sentinel_and_index_rejected() {
    let rig = rig();
    let mut conn = rig.registry.open();

    let mut setup = SetupRequest::new(0, Direction::FromDevice);
    setup.sentinel = 0xdead_beef;
    let err = conn.setup(&setup).unwrap_err();
    assert_eq!(err, KernelError::InvalidArgument);
    assert_eq!(DmaError::from(err).code(), ResultCode::ProtocolError);

    conn.setup(&SetupRequest::new(0, Direction::FromDevice)).unwrap();
    let mut req = AllocRequest::new(2, 128, 128);
    req.sentinel = 0;
    assert_eq!(conn.alloc(&mut req), Err(KernelError::InvalidArgument));

    let mut req = AllocRequest::new(2, 128, 128);
    conn.alloc(&mut req).unwrap();
    assert_eq!(conn.wait(&WaitRequest::new(2, 0)), Err(KernelError::InvalidArgument));
    let mut stale = WaitRequest::new(0, 0);
    stale.sentinel = !stale.sentinel;
    assert_eq!(conn.wait(&stale), Err(KernelError::InvalidArgument));
    conn.wait(&WaitRequest::new(1, 0)).unwrap();
}
