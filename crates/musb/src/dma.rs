//! Ownership and sequencing of the core's DMA channels.
//!
//! A channel is bound to exactly one endpoint+direction while a transfer uses
//! it. In Mode1 the endpoint interrupt is suppressed for full packets, so the
//! channel's auto-incrementing address register is the only byte count the
//! engine can trust: `bytes_moved = current_address - base_address`.

use log::{error, trace};
use tinyvec::ArrayVec;

use crate::error::{Error, Result};
use crate::regs::UsbCore;
use crate::types::{EpStatus, PipeDir};
use crate::DMA_CHANNELS;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DmaChannel(u8);

impl DmaChannel {
    pub fn new(index: u8) -> Result<Self> {
        if (index as usize) < DMA_CHANNELS {
            Ok(Self(index))
        } else {
            Err(Error::InvalidDmaChannel(index))
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn bit(self) -> u8 {
        1 << self.0
    }
}

/// Direction from the DMA engine's point of view.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DmaDir {
    /// Reads memory into a TX FIFO.
    #[default]
    Read,
    /// Writes an RX FIFO out to memory.
    Write,
}

impl DmaDir {
    pub fn for_pipe(dir: PipeDir) -> Self {
        match dir {
            PipeDir::Tx => DmaDir::Read,
            PipeDir::Rx => DmaDir::Write,
        }
    }

    pub fn pipe(self) -> PipeDir {
        match self {
            DmaDir::Read => PipeDir::Tx,
            DmaDir::Write => PipeDir::Rx,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DmaMode {
    /// One packet per activation.
    #[default]
    Mode0,
    /// Free-running until the programmed count is reached or a short packet
    /// arrives.
    Mode1,
}

#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DmaBurst {
    Burst0 = 0,
    Burst1 = 1,
    Burst2 = 2,
    #[default]
    Burst3 = 3,
}

/// Value written to a channel's control register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DmaControl {
    pub dir: DmaDir,
    pub mode: DmaMode,
    pub burst: DmaBurst,
    pub ep: u8,
    pub irq_enable: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub ep: u8,
    pub dir: PipeDir,
    pub mode: DmaMode,
    pub burst: DmaBurst,
    pub base: usize,
}

/// A channel that raised its completion interrupt.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DmaEvent {
    pub channel: DmaChannel,
    pub ep: u8,
    pub dir: PipeDir,
    /// Address register at the time the channel stopped.
    pub addr: usize,
    pub status: EpStatus,
}

#[derive(Debug, Default)]
pub struct DmaCoordinator {
    bindings: [Option<Binding>; DMA_CHANNELS],
}

impl DmaCoordinator {
    pub const fn new() -> Self {
        Self {
            bindings: [None; DMA_CHANNELS],
        }
    }

    pub fn binding(&self, ch: DmaChannel) -> Option<&Binding> {
        self.bindings[ch.index()].as_ref()
    }

    /// Binds `ch` to `ep`/`dir` and programs its control and address
    /// registers with the completion interrupt enabled.
    ///
    /// Rebinding the same endpoint+direction updates the channel in place; a
    /// channel owned by another pair is refused.
    pub fn bind<C: UsbCore>(
        &mut self,
        core: &mut C,
        ch: DmaChannel,
        ep: u8,
        dir: PipeDir,
        mode: DmaMode,
        burst: DmaBurst,
        base: usize,
    ) -> Result<()> {
        self.check_owner(ch, ep, dir)?;

        self.bindings[ch.index()] = Some(Binding {
            ep,
            dir,
            mode,
            burst,
            base,
        });
        core.dma_configure(
            ch,
            DmaControl {
                dir: DmaDir::for_pipe(dir),
                mode,
                burst,
                ep,
                irq_enable: true,
            },
        );
        core.dma_set_addr(ch, base);
        Ok(())
    }

    /// Fails with `DmaChannelBusy` when `ch` is bound to a pair other than
    /// `ep`/`dir`.
    pub fn check_owner(&self, ch: DmaChannel, ep: u8, dir: PipeDir) -> Result<()> {
        match self.bindings[ch.index()] {
            Some(owner) if owner.ep != ep || owner.dir != dir => Err(Error::DmaChannelBusy {
                channel: ch.0,
                ep: owner.ep,
                dir: owner.dir,
            }),
            _ => Ok(()),
        }
    }

    pub fn unbind(&mut self, ch: DmaChannel) {
        self.bindings[ch.index()] = None;
    }

    pub fn unbind_all(&mut self) {
        self.bindings = [None; DMA_CHANNELS];
    }

    /// Stops and frees whichever channel `ep`/`dir` currently holds.
    pub fn release_pipe<C: UsbCore>(&mut self, core: &mut C, ep: u8, dir: PipeDir) {
        for index in 0..DMA_CHANNELS {
            let Some(owner) = self.bindings[index] else {
                continue;
            };
            if owner.ep == ep && owner.dir == dir {
                let ch = DmaChannel(index as u8);
                trace!("DMA: ch{} released by EP{} {:?}", index, ep, dir);
                core.dma_stop(ch);
                self.bindings[index] = None;
            }
        }
    }

    /// Stops every bound channel and forgets all bindings.
    pub fn release_all<C: UsbCore>(&mut self, core: &mut C) {
        for index in 0..DMA_CHANNELS {
            if self.bindings[index].is_some() {
                core.dma_stop(DmaChannel(index as u8));
            }
        }
        self.unbind_all();
    }

    /// Points an already-bound channel at a new transfer buffer.
    pub fn set_base<C: UsbCore>(&mut self, core: &mut C, ch: DmaChannel, base: usize) {
        if let Some(binding) = self.bindings[ch.index()].as_mut() {
            binding.base = base;
        }
        core.dma_set_addr(ch, base);
    }

    pub fn set_mode<C: UsbCore>(&mut self, core: &mut C, ch: DmaChannel, mode: DmaMode) {
        let Some(binding) = self.bindings[ch.index()].as_mut() else {
            return;
        };
        binding.mode = mode;
        core.dma_configure(
            ch,
            DmaControl {
                dir: DmaDir::for_pipe(binding.dir),
                mode,
                burst: binding.burst,
                ep: binding.ep,
                irq_enable: true,
            },
        );
    }

    pub fn mode(&self, ch: DmaChannel) -> Option<DmaMode> {
        self.binding(ch).map(|b| b.mode)
    }

    pub fn start<C: UsbCore>(&self, core: &mut C, ch: DmaChannel, count: u32) {
        trace!("DMA: ch{} start, {} bytes", ch.0, count);
        core.dma_set_count(ch, count);
        core.dma_start(ch);
    }

    pub fn stop<C: UsbCore>(&self, core: &mut C, ch: DmaChannel) {
        core.dma_stop(ch);
    }

    /// Bytes the channel has moved since it was pointed at its base address.
    pub fn bytes_moved<C: UsbCore>(&self, core: &C, ch: DmaChannel) -> u32 {
        let base = self.binding(ch).map_or(0, |b| b.base);
        core.dma_addr(ch).saturating_sub(base) as u32
    }

    /// Stops every channel that raised its completion interrupt and reports
    /// which endpoint it belonged to.
    pub fn service<C: UsbCore>(&self, core: &mut C) -> ArrayVec<[DmaEvent; DMA_CHANNELS]> {
        let pending = core.read_dma_irq();
        let mut events = ArrayVec::new();

        for index in 0..DMA_CHANNELS as u8 {
            let ch = DmaChannel(index);
            if pending & ch.bit() == 0 {
                continue;
            }
            core.dma_stop(ch);

            let Some(binding) = self.bindings[ch.index()] else {
                error!("DMA: interrupt on unbound channel {}", index);
                continue;
            };

            let mut status = EpStatus::empty();
            if core.dma_bus_error(ch) {
                error!(
                    "DMA: bus error on ch{} (ep{} {:?})",
                    index, binding.ep, binding.dir
                );
                status |= EpStatus::DMA_BUS_ERROR;
            }

            events.push(DmaEvent {
                channel: ch,
                ep: binding.ep,
                dir: binding.dir,
                addr: core.dma_addr(ch),
                status,
            });
        }

        events
    }
}
