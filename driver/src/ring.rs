//! Descriptor ring and its ownership protocol.
//!
//! The ring splits into two runs:
//!
//! ```text
//!        tail                 head
//!         v                    v
//!  ... [ held / released ... ][ with hardware / completed ... ]
//!         \___ acquired ___/
//! ```
//!
//! `[tail, head)` belongs to software; it holds `acquired` descriptors.
//! Acquire takes the completed descriptor at `head`. Release clears a held
//! descriptor's ownership bit, then hands the longest contiguous released
//! run starting at `tail` to hardware by moving the tail pointer. A
//! descriptor that is still held stops the walk, whatever order releases
//! arrive in.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::trace;
use sgdma_kernel::desc::{DescView, Descriptor, DescStatus, DESC_SIZE};
use sgdma_kernel::Mapping;
use spin::Mutex;

use crate::buffer::DmaBuffer;
use crate::error::{DmaError, Result};

/// Descriptor ring of one channel.
pub struct DescriptorRing {
    /// Caller mapping of the ring block.
    mapping: Mapping,
    /// Number of descriptors.
    size: usize,
    /// Next descriptor to acquire.
    head: Mutex<usize>,
    /// Oldest descriptor not yet handed to hardware.
    tail: Mutex<usize>,
    /// Descriptors in `[tail, head)`. Acquire ordering on reads that gate a
    /// ring access, AcqRel on every update.
    acquired: AtomicUsize,
}

impl DescriptorRing {
    pub(crate) fn new(mapping: Mapping, size: usize) -> Self {
        Self {
            mapping,
            size,
            head: Mutex::new(0),
            tail: Mutex::new(0),
            acquired: AtomicUsize::new(size),
        }
    }

    /// Number of descriptors.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    fn desc(&self, index: usize) -> DescView<'_> {
        DescView::at(self.mapping.block(), index)
    }

    /// Bus address of descriptor `index`.
    #[inline]
    pub fn desc_paddr(&self, index: usize) -> u64 {
        self.mapping.paddr() + (index * DESC_SIZE) as u64
    }

    /// Snapshot of descriptor `index`.
    pub fn descriptor(&self, index: usize) -> Option<Descriptor> {
        (index < self.size).then(|| self.desc(index).load())
    }

    /// Ownership bit of descriptor `index`.
    pub fn is_complete(&self, index: usize) -> bool {
        index < self.size && self.desc(index).is_complete()
    }

    pub fn head(&self) -> usize {
        *self.head.lock()
    }

    pub fn tail(&self) -> usize {
        *self.tail.lock()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    /// Every descriptor is held by software.
    pub fn is_full(&self) -> bool {
        self.acquired() == self.size
    }

    /// Link the ring over `buffers` and give every descriptor to software.
    ///
    /// Descriptor `i` points at buffer `i` and at descriptor `(i + 1) % N`.
    pub fn link(&self, buffers: &[DmaBuffer]) {
        let mut head = self.head.lock();
        let mut tail = self.tail.lock();
        for (i, buffer) in buffers.iter().enumerate().take(self.size) {
            let desc = self.desc(i);
            desc.set_next(self.desc_paddr((i + 1) % self.size) as u32);
            desc.set_buf_addr(buffer.paddr() as u32);
            desc.set_control(0);
            for which in 0..sgdma_kernel::desc::APP_COUNT {
                desc.set_app(which, 0);
            }
            desc.set_status(DescStatus::COMPLETE.bits());
        }
        *head = 0;
        *tail = 0;
        self.acquired.store(self.size, Ordering::Release);
    }

    /// Hand every descriptor back without touching hardware.
    pub(crate) fn clear_acquired(&self) {
        let head = self.head.lock();
        let tail = self.tail.lock();
        debug_assert_eq!(*head, *tail);
        self.acquired.store(0, Ordering::Release);
    }

    /// Take the completed descriptor at `head`.
    ///
    /// # Returns
    ///
    /// The handle (ring index) of the taken descriptor.
    pub fn acquire(&self) -> Result<usize> {
        let mut head = self.head.lock();
        if self.acquired.load(Ordering::Acquire) == self.size {
            return Err(DmaError::Claimed);
        }
        if !self.desc(*head).is_complete() {
            return Err(DmaError::Incomplete);
        }
        let handle = *head;
        *head = (handle + 1) % self.size;
        self.acquired.fetch_add(1, Ordering::AcqRel);
        Ok(handle)
    }

    /// Whether `handle` is held by software and not yet released.
    fn is_held(&self, handle: usize, tail: usize) -> bool {
        let distance = (handle + self.size - tail) % self.size;
        distance < self.acquired.load(Ordering::Acquire) && self.desc(handle).is_complete()
    }

    /// Release a held descriptor with a new control word and advance the
    /// tail across the contiguous released run.
    ///
    /// `program_tail` is called with each descriptor's bus address as the
    /// tail passes it.
    ///
    /// # Returns
    ///
    /// How many descriptors were handed to hardware.
    pub fn release<F>(&self, handle: usize, control: u32, mut program_tail: F) -> Result<usize>
    where
        F: FnMut(u64),
    {
        if handle >= self.size {
            return Err(DmaError::Protocol("handle out of range"));
        }
        let mut tail = self.tail.lock();
        if !self.is_held(handle, *tail) {
            return Err(DmaError::Protocol("handle not held"));
        }

        let desc = self.desc(handle);
        desc.set_control(control);
        desc.set_status(0);

        let mut advanced = 0;
        while self.acquired.load(Ordering::Acquire) > 0 && !self.desc(*tail).is_complete() {
            program_tail(self.desc_paddr(*tail));
            *tail = (*tail + 1) % self.size;
            self.acquired.fetch_sub(1, Ordering::AcqRel);
            advanced += 1;
        }
        trace!(
            "sgdma: release {} -> tail {} (+{}), acquired {}",
            handle,
            *tail,
            advanced,
            self.acquired()
        );
        Ok(advanced)
    }

    /// Sideband word of a descriptor.
    pub fn app(&self, index: usize, which: usize) -> u32 {
        self.desc(index).app(which)
    }

    pub fn set_app(&self, index: usize, which: usize, value: u32) {
        self.desc(index).set_app(which, value);
    }

    /// Raw status word.
    pub fn status(&self, index: usize) -> u32 {
        self.desc(index).status()
    }
}
