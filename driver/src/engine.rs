//! One AXI DMA engine: a transmit and a receive channel over one register
//! block.

use std::sync::Arc;

use log::{info, warn};
use sgdma_kernel::{regs, Direction, Registry};

use crate::channel::{Channel, ChannelState};
use crate::config::DriverConfig;
use crate::error::{DmaError, Result};

/// Both channels of one engine.
#[derive(Debug)]
pub struct Engine {
    index: usize,
    config: DriverConfig,
    tx: Channel,
    rx: Channel,
}

impl Engine {
    /// Open both channels of engine `index` with the default configuration.
    pub fn create(registry: &Arc<Registry>, index: usize) -> Result<Self> {
        Self::with_config(registry, index, DriverConfig::default())
    }

    /// Open both channels of engine `index`.
    pub fn with_config(
        registry: &Arc<Registry>,
        index: usize,
        config: DriverConfig,
    ) -> Result<Self> {
        let tx = Channel::open(registry, index, Direction::ToDevice, config.clone())?;
        let rx = Channel::open(registry, index, Direction::FromDevice, config.clone())?;
        info!("sgdma: engine {} ready", index);
        Ok(Self {
            index,
            config,
            tx,
            rx,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Soft-reset the engine.
    ///
    /// Refused while either channel is running. Afterwards every channel
    /// that still owns memory is `Allocated` and can be initialized again.
    pub fn reset(&mut self) -> Result<()> {
        if self.tx.state() == ChannelState::Running || self.rx.state() == ChannelState::Running {
            return Err(DmaError::Busy);
        }
        let window = Arc::clone(self.tx.regs().window());
        if regs::reset(&*window, self.config.reset_loop).is_err() {
            warn!(
                "sgdma: engine {} reset did not complete within {} polls",
                self.index, self.config.reset_loop
            );
            return Err(DmaError::Timeout);
        }
        self.tx.on_reset();
        self.rx.on_reset();
        info!("sgdma: engine {} reset", self.index);
        Ok(())
    }

    pub fn channel(&self, direction: Direction) -> &Channel {
        match direction {
            Direction::ToDevice => &self.tx,
            Direction::FromDevice => &self.rx,
        }
    }

    pub fn channel_mut(&mut self, direction: Direction) -> &mut Channel {
        match direction {
            Direction::ToDevice => &mut self.tx,
            Direction::FromDevice => &mut self.rx,
        }
    }

    /// Transmit (memory to stream) channel.
    pub fn tx(&self) -> &Channel {
        &self.tx
    }

    /// Receive (stream to memory) channel.
    pub fn rx(&self) -> &Channel {
        &self.rx
    }

    pub fn tx_mut(&mut self) -> &mut Channel {
        &mut self.tx
    }

    pub fn rx_mut(&mut self) -> &mut Channel {
        &mut self.rx
    }

    /// Both channels at once, transmit first.
    pub fn channels_mut(&mut self) -> (&mut Channel, &mut Channel) {
        (&mut self.tx, &mut self.rx)
    }

    /// Halt and free both channels, then close them.
    ///
    /// Every step is attempted; the first error is reported.
    pub fn destroy(mut self) -> Result<()> {
        let mut first = Ok(());
        for channel in [&mut self.tx, &mut self.rx] {
            if channel.state() == ChannelState::Running {
                if let Err(e) = channel.halt() {
                    first = first.and(Err(e));
                }
            }
            if channel.state() != ChannelState::Running {
                if let Err(e) = channel.free() {
                    first = first.and(Err(e));
                }
            }
        }
        info!("sgdma: engine {} destroyed", self.index);
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgdma_kernel::sim::{SimAxiDma, SimConfig};
    use sgdma_kernel::RegistryConfig;

    fn setup(config: SimConfig) -> (Arc<Registry>, Arc<SimAxiDma>, Engine) {
        let registry = Registry::new(RegistryConfig::default()).unwrap();
        let sim = Arc::new(SimAxiDma::new(Arc::clone(registry.pool()), config));
        let index = registry.add_engine(sim.clone());
        let engine = Engine::with_config(&registry, index, DriverConfig::for_sim()).unwrap();
        (registry, sim, engine)
    }

    #[test]
    fn test_create_opens_both_channels() {
        let (_registry, _sim, engine) = setup(SimConfig::default());
        assert_eq!(engine.tx().direction(), Direction::ToDevice);
        assert_eq!(engine.rx().direction(), Direction::FromDevice);
        assert_eq!(engine.channel(Direction::FromDevice).state(), ChannelState::Empty);
    }

    #[test]
    fn test_create_unknown_engine() {
        let registry = Registry::new(RegistryConfig::default()).unwrap();
        let err = Engine::create(&registry, 3).unwrap_err();
        assert_eq!(err, DmaError::Protocol("no such engine"));
    }

    #[test]
    fn test_reset_refused_while_running() {
        let (_registry, _sim, mut engine) = setup(SimConfig::default());
        engine.tx_mut().alloc(2, 128).unwrap();
        engine.tx_mut().init(true).unwrap();
        assert_eq!(engine.reset(), Err(DmaError::Busy));
        engine.tx_mut().halt().unwrap();
        engine.reset().unwrap();
        assert_eq!(engine.tx().state(), ChannelState::Allocated);
        assert_eq!(engine.rx().state(), ChannelState::Empty);
    }

    #[test]
    fn test_reset_timeout() {
        let (_registry, _sim, mut engine) = setup(SimConfig::default().stall_reset(true));
        assert_eq!(engine.reset(), Err(DmaError::Timeout));
    }

    #[test]
    fn test_destroy_releases_memory() {
        let (registry, _sim, mut engine) = setup(SimConfig::default());
        let (tx, rx) = engine.channels_mut();
        tx.alloc(4, 512).unwrap();
        rx.alloc(4, 512).unwrap();
        rx.init(true).unwrap();
        assert!(registry.pool().used() > 0);
        engine.destroy().unwrap();
        assert_eq!(registry.pool().used(), 0);
        assert!(!registry.is_allocated(0, Direction::FromDevice));
    }
}
