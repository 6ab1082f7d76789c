//! MM2S looped back into S2MM through the simulated engine, with
//! completions delivered by the interrupt path.

mod common;

use std::thread;
use std::time::Duration;

use common::rig;
use sgdma::{Direction, DmaError, Engine};
use sgdma_kernel::desc::DescStatus;

const N: usize = 4;
const SIZE: usize = 4096;

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[test]
fn test_blocked_receiver_woken_by_interrupt() {
    let mut rig = rig();
    let (tx, rx) = rig.engine.channels_mut();
    tx.alloc(N, SIZE).unwrap();
    rx.alloc(N, SIZE).unwrap();
    rx.init(true).unwrap();
    tx.init(true).unwrap();

    let (tx, rx) = (rig.engine.tx(), rig.engine.rx());
    assert_eq!(rx.wait(Duration::from_micros(100)), Err(DmaError::Timeout));

    let payload = pattern(64, 7);
    let (handle, capacity) = tx.acquire().unwrap();
    assert_eq!(capacity, SIZE);
    tx.buffer(handle).unwrap().write(0, &payload);
    tx.set_app_field(handle, 0, 0xfeed).unwrap();
    tx.set_app_field(handle, 4, 0xc0de).unwrap();
    tx.release(handle, payload.len()).unwrap();

    let irqs_before = rig.registry.irq_count(0).unwrap();
    let sim = &rig.sim;
    thread::scope(|s| {
        let waiter = s.spawn(|| rx.wait(Duration::from_secs(10)));
        s.spawn(|| {
            thread::sleep(Duration::from_millis(20));
            assert_eq!(sim.step(), 2);
        });
        assert_eq!(waiter.join().unwrap(), Ok(()));
    });
    assert!(rig.registry.irq_count(0).unwrap() > irqs_before);

    let (rx_handle, len) = rx.acquire().unwrap();
    assert_eq!(rx_handle, 0);
    assert_eq!(len, payload.len());
    assert_eq!(rx.buffer(rx_handle).unwrap().to_vec(len), payload);
    assert_eq!(rx.app_field(rx_handle, 0), Ok(0xfeed));
    assert_eq!(rx.app_field(rx_handle, 4), Ok(0xc0de));
    let status = DescStatus::from_bits_retain(rx.descriptor(rx_handle).unwrap().status);
    assert!(status.contains(DescStatus::RX_SOF | DescStatus::RX_EOF));

    // Transmit side got its buffer back
    assert_eq!(tx.wait(Duration::ZERO), Ok(()));
    assert_eq!(rig.sim.completed(Direction::ToDevice), 1);

    rx.release(rx_handle, 0).unwrap();
    assert_eq!(rx.acquired(), 0);
    tx.check_errors().unwrap();
    rx.check_errors().unwrap();
}

#[test]
fn test_stream_of_packets_in_order() {
    let mut rig = rig();
    let (tx, rx) = rig.engine.channels_mut();
    tx.alloc(N, 512).unwrap();
    rx.alloc(N, 512).unwrap();
    rx.init(true).unwrap();
    tx.init(true).unwrap();
    let (tx, rx) = (rig.engine.tx(), rig.engine.rx());

    // Several laps around both rings
    for round in 0..(3 * N) {
        let payload = pattern(100 + round, round as u8);
        tx.wait(Duration::ZERO).unwrap();
        let (handle, _) = tx.acquire().unwrap();
        assert_eq!(handle, round % N);
        tx.buffer(handle).unwrap().write(0, &payload);
        tx.release(handle, payload.len()).unwrap();

        rig.sim.step();

        rx.wait(Duration::from_millis(100)).unwrap();
        let (rx_handle, len) = rx.acquire().unwrap();
        assert_eq!(rx_handle, round % N);
        assert_eq!(rx.buffer(rx_handle).unwrap().to_vec(len), payload);
        rx.release(rx_handle, 0).unwrap();
    }
    assert_eq!(rig.sim.completed(Direction::FromDevice), 3 * N as u64);
}

#[test]
fn test_long_packet_spans_descriptors() {
    let mut rig = rig();
    rig.engine.rx_mut().alloc(N, 256).unwrap();
    rig.engine.rx_mut().init(true).unwrap();
    let rx = rig.engine.rx();

    let payload = pattern(600, 3);
    rig.sim.inject(&payload, [1, 2, 3, 4, 5]);
    assert_eq!(rig.sim.step(), 3);

    let mut received = Vec::new();
    let mut flags = Vec::new();
    while let Ok((handle, len)) = rx.acquire() {
        received.extend(rx.buffer(handle).unwrap().to_vec(len));
        flags.push(DescStatus::from_bits_retain(rx.descriptor(handle).unwrap().status));
    }
    assert_eq!(received, payload);
    assert_eq!(flags.len(), 3);
    assert!(flags[0].contains(DescStatus::RX_SOF));
    assert!(!flags[0].contains(DescStatus::RX_EOF));
    assert!(flags[2].contains(DescStatus::RX_EOF));
    assert_eq!(rx.app_field(2, 2), Ok(3));
}

#[test]
fn test_app_field_bounds() {
    let mut rig = rig();
    rig.engine.tx_mut().alloc(N, 64).unwrap();
    let tx = rig.engine.tx();
    assert!(matches!(tx.set_app_field(0, 5, 1), Err(DmaError::Protocol(_))));
    assert!(matches!(tx.set_app_field(N, 0, 1), Err(DmaError::Protocol(_))));
    assert!(matches!(tx.app_field(0, 5), Err(DmaError::Protocol(_))));
    tx.set_app_field(3, 1, 42).unwrap();
    assert_eq!(tx.app_field(3, 1), Ok(42));
}

#[test]
fn test_coalesced_interrupts() {
    let rig = rig();
    let config = rig.engine.config().clone().irq_coalesce(2);
    // Second handle on the same engine; the fixture's channels stay empty
    let mut engine = Engine::with_config(&rig.registry, 0, config).unwrap();
    engine.tx_mut().alloc(N, 64).unwrap();
    engine.tx_mut().init(true).unwrap();
    let tx = engine.tx();

    let before = rig.registry.irq_count(0).unwrap();
    let (handle, _) = tx.acquire().unwrap();
    tx.release(handle, 8).unwrap();
    assert_eq!(rig.sim.step(), 1);
    assert_eq!(rig.registry.irq_count(0).unwrap(), before);

    let (handle, _) = tx.acquire().unwrap();
    tx.release(handle, 8).unwrap();
    assert_eq!(rig.sim.step(), 1);
    assert_eq!(rig.registry.irq_count(0).unwrap(), before + 1);
}
