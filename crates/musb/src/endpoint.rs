//! The per-pipe record shared by every state machine.

use log::error;

use crate::buffer::Buffer;
use crate::config::EndpointConfig;
use crate::dma::DmaChannel;
use crate::error::{Error, Result};
use crate::types::{EpStatus, PipeDir, TransferType};
use crate::MAX_ENDPOINTS;

/// Index of data endpoint `num` in the per-direction arrays. Endpoint 0 is
/// the control endpoint and has its own record.
pub(crate) fn data_endpoint(num: u8) -> Result<usize> {
    if num == 0 || num as usize >= MAX_ENDPOINTS {
        return Err(Error::InvalidEndpoint(num));
    }
    Ok(num as usize)
}

/// Whether a bulk transfer whose length is an exact multiple of the max
/// packet size is terminated by an explicit zero-length packet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferPolicy {
    pub add_zlp: bool,
}

impl TransferPolicy {
    pub const NO_ZLP: Self = Self { add_zlp: false };
    pub const ZLP: Self = Self { add_zlp: true };
}

/// Progress of the pipe's current transfer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EpState {
    #[default]
    Unconfigured,
    Idle,
    /// A transaction is on the bus or queued in the FIFO.
    InFlight,
    /// TX: the final full packet went out and a zero-length packet follows.
    SendingZlp,
    /// RX bulk Mode1: DMA stopped, final short packet being drained from the
    /// FIFO by software.
    RxDmaDraining,
    /// Completion callback delivered; holds the reported status.
    Done(EpStatus),
    Aborted,
}

/// Canonical state of one pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct Endpoint {
    pub number: u8,
    pub dir: PipeDir,
    pub xfr_type: TransferType,
    pub max_pkt_size: u16,
    pub fifo_size: u16,
    pub fifo_addr: u16,
    pub dpb: bool,
    /// Packets per (micro)frame; only 1 is scheduled.
    pub num_usb_pkt: u8,
    pub dma: Option<DmaChannel>,
    pub policy: TransferPolicy,
    pub state: EpState,
    /// Sticky halt, cleared only by an explicit clear-stall.
    pub stalled: bool,

    pub(crate) buf: Option<Buffer>,
    pub xfr_length: u32,
    pub xfr_count: u32,
    pub txn_length: u32,
    pub txn_count: u32,

    // host mode only
    pub target_addr: u8,
    pub target_ep: u8,
    pub interval: u32,
}

impl Endpoint {
    pub fn new(dir: PipeDir, config: &EndpointConfig) -> Self {
        Self {
            number: config.number,
            dir,
            xfr_type: config.xfr_type,
            max_pkt_size: config.max_pkt_size,
            fifo_size: config.fifo_size,
            fifo_addr: config.fifo_addr,
            dpb: config.dpb,
            num_usb_pkt: 1,
            dma: config.dma,
            policy: config.policy,
            state: EpState::Idle,
            target_ep: config.target_ep,
            interval: config.interval,
            ..Default::default()
        }
    }

    /// The control endpoint record.
    pub fn control(max_pkt_size: u16, fifo_size: u16) -> Self {
        Self {
            number: 0,
            xfr_type: TransferType::Control,
            max_pkt_size,
            fifo_size,
            num_usb_pkt: 1,
            state: EpState::Idle,
            ..Default::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        self.state != EpState::Unconfigured
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            EpState::InFlight | EpState::SendingZlp | EpState::RxDmaDraining
        )
    }

    pub fn buffer_count(&self) -> u16 {
        if self.dpb {
            2
        } else {
            1
        }
    }

    /// `max_packet_size * bufcount <= fifo_size`, FIFO non-empty and
    /// 8-byte granular.
    pub fn validate_geometry(&self) -> Result<()> {
        if self.fifo_size == 0 || self.fifo_size % 8 != 0 {
            return Err(Error::InvalidFifo);
        }
        if self.max_pkt_size == 0
            || self.max_pkt_size as u32 * self.buffer_count() as u32 > self.fifo_size as u32
        {
            return Err(Error::InvalidPacketSize);
        }
        Ok(())
    }

    /// Resets progress counters for a new transfer of `length` bytes.
    pub fn begin(&mut self, buf: Option<Buffer>, length: u32) {
        self.buf = buf;
        self.xfr_length = length;
        self.xfr_count = 0;
        self.txn_length = 0;
        self.txn_count = 0;
        self.state = EpState::InFlight;
    }

    pub fn remaining(&self) -> u32 {
        self.xfr_length - self.xfr_count
    }

    /// Records `count` bytes moved by the in-flight transaction.
    ///
    /// Exceeding the requested length is a driver bug, not a bus condition.
    pub fn advance(&mut self, count: u32) {
        if count > self.txn_length || self.xfr_count + count > self.xfr_length {
            error!(
                "EP{} {:?}: {} bytes on top of {}/{} (transaction {})",
                self.number, self.dir, count, self.xfr_count, self.xfr_length, self.txn_length
            );
            panic!("transfer_count exceeded transfer_length");
        }
        self.txn_count = count;
        self.xfr_count += count;
    }

    /// Sets the running total directly, e.g. from a DMA address delta.
    pub fn set_count(&mut self, count: u32) {
        if count > self.xfr_length {
            error!(
                "EP{} {:?}: DMA moved {} bytes into a {} byte transfer",
                self.number, self.dir, count, self.xfr_length
            );
            panic!("transfer_count exceeded transfer_length");
        }
        self.xfr_count = count;
    }

    pub fn finish(&mut self, status: EpStatus) {
        self.state = EpState::Done(status);
    }

    /// Returns the pipe to its post-configuration defaults.
    pub fn reset_progress(&mut self) {
        self.buf = None;
        self.xfr_length = 0;
        self.xfr_count = 0;
        self.txn_length = 0;
        self.txn_count = 0;
        if self.is_configured() {
            self.state = EpState::Idle;
        }
    }
}
