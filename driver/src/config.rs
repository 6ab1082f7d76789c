//! Driver configuration.

use sgdma_kernel::regs::{HALT_LOOP, RESET_LOOP};

/// Channel and engine tuning.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Polls of the reset bit before giving up.
    pub reset_loop: u32,
    /// Polls of the halted bit before giving up.
    pub halt_loop: u32,
    /// Completions per interrupt (0 keeps the engine default of 1).
    pub irq_coalesce: u8,
    /// Interrupt delay timeout in engine ticks (0 disables).
    pub irq_delay: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            reset_loop: RESET_LOOP,
            halt_loop: HALT_LOOP,
            irq_coalesce: 0,
            irq_delay: 0,
        }
    }
}

impl DriverConfig {
    /// Short polling bounds for simulated engines.
    pub fn for_sim() -> Self {
        Self {
            reset_loop: 1_000,
            halt_loop: 1_000,
            ..Default::default()
        }
    }

    /// Set the reset polling bound.
    pub fn reset_loop(mut self, iterations: u32) -> Self {
        self.reset_loop = iterations;
        self
    }

    /// Set the halt polling bound.
    pub fn halt_loop(mut self, iterations: u32) -> Self {
        self.halt_loop = iterations;
        self
    }

    /// Set the interrupt coalescing threshold.
    pub fn irq_coalesce(mut self, count: u8) -> Self {
        self.irq_coalesce = count;
        self
    }

    /// Set the interrupt delay timeout.
    pub fn irq_delay(mut self, ticks: u8) -> Self {
        self.irq_delay = ticks;
        self
    }
}
