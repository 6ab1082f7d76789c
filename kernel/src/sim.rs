//! Simulated AXI DMA engine.
//!
//! Register-accurate model of an AXI DMA in scatter/gather mode with its
//! MM2S stream looped back into S2MM. The model reaches memory only through
//! the coherent pool's physical lookup, exactly like a bus master would.
//!
//! Nothing moves until [`SimAxiDma::step`] is called; tests drive the
//! engine explicitly, or from a helper thread to exercise blocking waits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use sgdma_pool::CoherentPool;
use spin::Mutex;

use crate::abi::Direction;
use crate::desc::{DescStatus, DescView, APP_COUNT, DESC_SIZE, LENGTH_MASK};
use crate::irq::InterruptSink;
use crate::regs::{
    DmaControl, DmaStatus, RegisterWindow, CURDESC, CURDESC_MSB, DMACR, DMASR, IRQ_THRESHOLD_SHIFT,
    S2MM_BASE, SG_CTL, TAILDESC, TAILDESC_MSB,
};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════

/// Simulated engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    /// Report the scatter/gather capability bit.
    pub sg_capable: bool,
    /// Never clear the reset bit.
    pub stall_reset: bool,
    /// Never report halted after the run bit is cleared.
    pub stall_halt: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sg_capable: true,
            stall_reset: false,
            stall_halt: false,
        }
    }
}

impl SimConfig {
    pub fn sg_capable(mut self, yes: bool) -> Self {
        self.sg_capable = yes;
        self
    }

    pub fn stall_reset(mut self, yes: bool) -> Self {
        self.stall_reset = yes;
        self
    }

    pub fn stall_halt(mut self, yes: bool) -> Self {
        self.stall_halt = yes;
        self
    }
}

/// One stream packet with its sideband words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub app: [u32; APP_COUNT],
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct SimChannel {
    ctrl: u32,
    status: u32,
    cur: u64,
    tail: u64,
    /// Next descriptor to fetch.
    fetch: u64,
    /// Tail written while running and not yet reached.
    armed: bool,
    /// Completions since the last IOC interrupt.
    pending: u32,
    completed: u64,
}

impl SimChannel {
    fn reset(sg_capable: bool) -> Self {
        let mut status = DmaStatus::HALTED;
        if sg_capable {
            status |= DmaStatus::SG_INCLUDED;
        }
        Self {
            status: status.bits(),
            ..Default::default()
        }
    }

    fn running(&self) -> bool {
        self.ctrl & DmaControl::RUN_STOP.bits() != 0 && self.status & DmaStatus::HALTED.bits() == 0
    }

    fn control(&self) -> DmaControl {
        DmaControl::from_bits_retain(self.ctrl)
    }

    fn set_status(&mut self, bits: DmaStatus) {
        self.status |= bits.bits();
    }

    fn clear_status(&mut self, bits: DmaStatus) {
        self.status &= !bits.bits();
    }

    /// Stop on an error as the hardware does. Returns whether to interrupt.
    fn fault(&mut self, err: DmaStatus) -> bool {
        self.set_status(err | DmaStatus::ERR_IRQ | DmaStatus::HALTED);
        self.ctrl &= !DmaControl::RUN_STOP.bits();
        self.armed = false;
        self.control().contains(DmaControl::ERR_IRQ_EN)
    }

    /// Account one completion. Returns whether to interrupt.
    fn complete(&mut self) -> bool {
        self.completed += 1;
        let ctrl = self.control();
        if !ctrl.contains(DmaControl::IOC_IRQ_EN) {
            return false;
        }
        let threshold = ((self.ctrl >> IRQ_THRESHOLD_SHIFT) & 0xFF).max(1);
        self.pending += 1;
        if self.pending >= threshold {
            self.pending = 0;
            self.set_status(DmaStatus::IOC_IRQ);
            return true;
        }
        false
    }

    /// Reached the tail. Returns whether a delay interrupt is due.
    fn go_idle(&mut self) -> bool {
        self.armed = false;
        self.set_status(DmaStatus::IDLE);
        if self.pending > 0 && self.control().contains(DmaControl::DLY_IRQ_EN) {
            self.pending = 0;
            self.set_status(DmaStatus::DLY_IRQ);
            return true;
        }
        false
    }
}

struct SimState {
    chans: [SimChannel; 2],
    sg_ctl: u32,
    /// Packets sent by MM2S and not yet received by S2MM.
    stream: VecDeque<Packet>,
    /// Bytes of the front packet already written by S2MM.
    rx_offset: usize,
}

/// Result of trying to process one descriptor.
enum Step {
    /// Nothing to do.
    Idle,
    /// One descriptor handled (or faulted); carries the interrupt request.
    Done(bool),
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Simulated AXI DMA with MM2S looped back to S2MM.
pub struct SimAxiDma {
    pool: Arc<CoherentPool>,
    sg_capable: bool,
    stall_reset: AtomicBool,
    stall_halt: AtomicBool,
    state: Mutex<SimState>,
    sink: Mutex<Option<Arc<dyn InterruptSink>>>,
}

impl SimAxiDma {
    /// Create an engine that masters memory through `pool`.
    pub fn new(pool: Arc<CoherentPool>, config: SimConfig) -> Self {
        Self {
            pool,
            sg_capable: config.sg_capable,
            stall_reset: AtomicBool::new(config.stall_reset),
            stall_halt: AtomicBool::new(config.stall_halt),
            state: Mutex::new(SimState {
                chans: [
                    SimChannel::reset(config.sg_capable),
                    SimChannel::reset(config.sg_capable),
                ],
                sg_ctl: 0,
                stream: VecDeque::new(),
                rx_offset: 0,
            }),
            sink: Mutex::new(None),
        }
    }

    /// Wire the interrupt line.
    pub fn attach_interrupt(&self, sink: Arc<dyn InterruptSink>) {
        *self.sink.lock() = Some(sink);
    }

    pub fn set_stall_reset(&self, yes: bool) {
        self.stall_reset.store(yes, Ordering::Release);
    }

    pub fn set_stall_halt(&self, yes: bool) {
        self.stall_halt.store(yes, Ordering::Release);
    }

    /// Queue a packet on the S2MM input stream.
    pub fn inject(&self, data: &[u8], app: [u32; APP_COUNT]) {
        self.state.lock().stream.push_back(Packet {
            data: data.to_vec(),
            app,
        });
    }

    /// Take every packet MM2S sent that S2MM has not received.
    pub fn drain_transmitted(&self) -> Vec<Packet> {
        let mut state = self.state.lock();
        state.rx_offset = 0;
        state.stream.drain(..).collect()
    }

    /// Packets waiting in the loopback stream.
    pub fn pending_packets(&self) -> usize {
        self.state.lock().stream.len()
    }

    /// Descriptors completed on a channel since the last reset.
    pub fn completed(&self, direction: Direction) -> u64 {
        self.state.lock().chans[direction.index()].completed
    }

    /// Whether a channel has an outstanding tail to reach.
    pub fn is_armed(&self, direction: Direction) -> bool {
        self.state.lock().chans[direction.index()].armed
    }

    /// Run both channels until neither can make progress.
    ///
    /// # Returns
    ///
    /// Number of descriptors processed.
    pub fn step(&self) -> usize {
        let mut processed = 0;
        let mut raise = false;
        {
            let mut state = self.state.lock();
            loop {
                let mut progress = false;
                for direction in [Direction::ToDevice, Direction::FromDevice] {
                    while let Step::Done(irq) = self.process_one(&mut state, direction) {
                        processed += 1;
                        raise |= irq;
                        progress = true;
                    }
                }
                if !progress {
                    break;
                }
            }
        }
        if processed > 0 {
            trace!("sgdma-sim: processed {} descriptors", processed);
        }
        if raise {
            let sink = self.sink.lock().clone();
            if let Some(sink) = sink {
                sink.raise();
            }
        }
        processed
    }

    fn process_one(&self, state: &mut SimState, direction: Direction) -> Step {
        let ch = direction.index();
        if !state.chans[ch].armed || !state.chans[ch].running() {
            return Step::Idle;
        }
        if direction == Direction::FromDevice && state.stream.is_empty() {
            return Step::Idle;
        }

        let at = state.chans[ch].fetch;
        let (ring, offset) = match self.pool.resolve(at) {
            Some((block, offset)) if offset + DESC_SIZE <= block.len() => (block, offset),
            _ => {
                warn!("sgdma-sim: {} descriptor fetch at {:#x} failed", direction.name(), at);
                return Step::Done(state.chans[ch].fault(DmaStatus::SG_DEC_ERR));
            }
        };
        let desc = DescView::new(&ring, offset);
        if desc.is_complete() {
            warn!("sgdma-sim: {} fetched completed descriptor {:#x}", direction.name(), at);
            return Step::Done(state.chans[ch].fault(DmaStatus::SG_INT_ERR));
        }

        let capacity = (desc.control() & LENGTH_MASK) as usize;
        let buf_addr = desc.buf_addr() as u64;
        let (buf, buf_off) = match self.pool.resolve(buf_addr) {
            Some((block, off)) if off + capacity <= block.len() => (block, off),
            _ => {
                warn!("sgdma-sim: {} buffer {:#x} unmapped", direction.name(), buf_addr);
                return Step::Done(state.chans[ch].fault(DmaStatus::DMA_DEC_ERR));
            }
        };

        match direction {
            Direction::ToDevice => {
                let mut data = vec![0u8; capacity];
                buf.read_bytes(buf_off, &mut data);
                let mut app = [0u32; APP_COUNT];
                for (i, word) in app.iter_mut().enumerate() {
                    *word = desc.app(i);
                }
                state.stream.push_back(Packet { data, app });
                desc.set_status(DescStatus::COMPLETE.bits() | capacity as u32);
            }
            Direction::FromDevice => {
                let rx_offset = state.rx_offset;
                let Some(packet) = state.stream.front() else {
                    return Step::Idle;
                };
                let remaining = packet.data.len() - rx_offset;
                let n = remaining.min(capacity);
                buf.write_bytes(buf_off, &packet.data[rx_offset..rx_offset + n]);

                let mut status = DescStatus::COMPLETE.bits() | n as u32;
                if rx_offset == 0 {
                    status |= DescStatus::RX_SOF.bits();
                }
                if n == remaining {
                    status |= DescStatus::RX_EOF.bits();
                    for (i, word) in packet.app.iter().enumerate() {
                        desc.set_app(i, *word);
                    }
                    state.stream.pop_front();
                    state.rx_offset = 0;
                } else {
                    state.rx_offset += n;
                }
                desc.set_status(status);
            }
        }

        let chan = &mut state.chans[ch];
        chan.cur = at;
        chan.fetch = desc.next() as u64;
        let mut irq = chan.complete();
        if at == chan.tail {
            irq |= chan.go_idle();
        }
        Step::Done(irq)
    }

    fn reset_all(&self, state: &mut SimState) {
        for chan in state.chans.iter_mut() {
            *chan = SimChannel::reset(self.sg_capable);
        }
        state.sg_ctl = 0;
        state.stream.clear();
        state.rx_offset = 0;
        debug!("sgdma-sim: soft reset");
    }

    fn write_control(&self, state: &mut SimState, ch: usize, value: u32) {
        if value & DmaControl::RESET.bits() != 0 {
            if self.stall_reset.load(Ordering::Acquire) {
                state.chans[ch].ctrl = value;
            } else {
                self.reset_all(state);
            }
            return;
        }
        let stall_halt = self.stall_halt.load(Ordering::Acquire);
        let chan = &mut state.chans[ch];
        chan.ctrl = value;
        if value & DmaControl::RUN_STOP.bits() != 0 {
            chan.clear_status(DmaStatus::HALTED | DmaStatus::IDLE);
        } else {
            chan.armed = false;
            if !stall_halt {
                chan.set_status(DmaStatus::HALTED);
            }
        }
    }
}

/// Split an absolute register offset into (channel, register).
fn decode(offset: usize) -> Option<(usize, usize)> {
    match offset {
        o if o <= TAILDESC_MSB => Some((0, o)),
        o if (S2MM_BASE..=S2MM_BASE + TAILDESC_MSB).contains(&o) => Some((1, o - S2MM_BASE)),
        _ => None,
    }
}

impl RegisterWindow for SimAxiDma {
    fn read32(&self, offset: usize) -> u32 {
        let state = self.state.lock();
        if offset == SG_CTL {
            return state.sg_ctl;
        }
        let Some((ch, reg)) = decode(offset) else {
            return 0;
        };
        let chan = &state.chans[ch];
        match reg {
            DMACR => chan.ctrl,
            DMASR => chan.status,
            CURDESC => chan.cur as u32,
            CURDESC_MSB => (chan.cur >> 32) as u32,
            TAILDESC => chan.tail as u32,
            TAILDESC_MSB => (chan.tail >> 32) as u32,
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut state = self.state.lock();
        if offset == SG_CTL {
            state.sg_ctl = value;
            return;
        }
        let Some((ch, reg)) = decode(offset) else {
            return;
        };
        match reg {
            DMACR => self.write_control(&mut state, ch, value),
            DMASR => {
                let w1c = DmaStatus::from_bits_truncate(value) & DmaStatus::IRQ_ALL;
                state.chans[ch].clear_status(w1c);
            }
            CURDESC => {
                let chan = &mut state.chans[ch];
                chan.cur = (chan.cur & !0xFFFF_FFFF) | value as u64;
                chan.fetch = chan.cur;
            }
            CURDESC_MSB => {
                let chan = &mut state.chans[ch];
                chan.cur = (chan.cur & 0xFFFF_FFFF) | (value as u64) << 32;
                chan.fetch = chan.cur;
            }
            TAILDESC => {
                let chan = &mut state.chans[ch];
                chan.tail = (chan.tail & !0xFFFF_FFFF) | value as u64;
                if chan.running() {
                    chan.armed = true;
                    chan.clear_status(DmaStatus::IDLE);
                }
            }
            TAILDESC_MSB => {
                let chan = &mut state.chans[ch];
                chan.tail = (chan.tail & 0xFFFF_FFFF) | (value as u64) << 32;
            }
            _ => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
