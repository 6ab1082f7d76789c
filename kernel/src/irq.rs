//! Engine interrupt handling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;

use crate::abi::Direction;
use crate::notify::WaitQueue;
use crate::regs::{ChannelRegs, DmaStatus, RegisterWindow};

/// Something that can be signalled when the engine raises its interrupt line.
pub trait InterruptSink: Send + Sync {
    fn raise(&self);
}

/// Interrupt handler for one engine.
///
/// Acknowledges every pending interrupt bit on both channels, counts the
/// interrupt and wakes all waiters. It does not look at descriptors.
pub struct EngineIrq {
    mm2s: ChannelRegs,
    s2mm: ChannelRegs,
    queue: Arc<WaitQueue>,
    count: AtomicU64,
}

impl EngineIrq {
    pub fn new(window: Arc<dyn RegisterWindow>, queue: Arc<WaitQueue>) -> Self {
        Self {
            mm2s: ChannelRegs::new(Arc::clone(&window), Direction::ToDevice),
            s2mm: ChannelRegs::new(window, Direction::FromDevice),
            queue,
            count: AtomicU64::new(0),
        }
    }

    /// Service one interrupt.
    pub fn handle(&self) {
        self.mm2s.ack_irq(DmaStatus::IRQ_ALL);
        self.s2mm.ack_irq(DmaStatus::IRQ_ALL);
        let n = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("sgdma: irq #{}", n);
        self.queue.notify_all();
    }

    /// Interrupts serviced so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &Arc<WaitQueue> {
        &self.queue
    }
}

impl InterruptSink for EngineIrq {
    fn raise(&self) {
        self.handle();
    }
}
