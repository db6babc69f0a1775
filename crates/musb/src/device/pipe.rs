//! Device data endpoints: IN endpoints on the TX half of a slot, OUT
//! endpoints on the RX half.

use log::{debug, trace, warn};

use super::{DeviceClassDriver, DeviceController};
use crate::buffer::Buffer;
use crate::config::EndpointConfig;
use crate::dma::DmaMode;
use crate::endpoint::{data_endpoint, EpState, Endpoint};
use crate::error::{Error, Result};
use crate::regs::{CepCsr, EpCsr, UsbCore};
use crate::transfer::{self, Progress};
use crate::types::{EpStatus, PipeDir, TransferType, UsbSpeed};

/// Largest wMaxPacketSize USB 2.0 allows for `xfr_type` at `speed`.
pub fn max_packet_limit(speed: UsbSpeed, xfr_type: TransferType) -> Option<u16> {
    match (speed, xfr_type) {
        (_, TransferType::Control) => None,
        (UsbSpeed::High, TransferType::Bulk) => Some(512),
        (UsbSpeed::High, _) => Some(1024),
        (_, TransferType::Isochronous | TransferType::HighBandwidthIsochronous) => Some(1023),
        (_, _) => Some(64),
    }
}

impl<C: UsbCore, K: DeviceClassDriver> DeviceController<C, K> {
    /// Sets up one half of slot `config.number`; `dir` is `Tx` for an IN
    /// endpoint.
    ///
    /// Two max-size packets double-buffer the FIFO whenever it has room for
    /// them.
    pub fn configure_endpoint(&mut self, dir: PipeDir, config: &EndpointConfig) -> Result<()> {
        let n = data_endpoint(config.number)?;
        match max_packet_limit(self.speed, config.xfr_type) {
            Some(limit) if config.max_pkt_size <= limit => {}
            _ => return Err(Error::InvalidPacketSize),
        }
        if config.fifo_size < config.max_pkt_size {
            return Err(Error::InvalidFifo);
        }

        let eps = match dir {
            PipeDir::Tx => &mut self.tx,
            PipeDir::Rx => &mut self.rx,
        };
        if eps[n].is_busy() {
            return Err(Error::PipeBusy);
        }

        let mut ep = Endpoint::new(dir, config);
        ep.dpb = 2 * config.max_pkt_size as u32 <= config.fifo_size as u32;
        transfer::configure(&mut self.core, &mut self.dma, &mut ep)?;
        eps[n] = ep;
        Ok(())
    }

    /// Queues `length` bytes of `buf` on IN endpoint `ep`.
    pub fn write_endpoint(&mut self, ep: u8, buf: Buffer, length: u32) -> Result<()> {
        let n = data_endpoint(ep)?;
        let pipe = &mut self.tx[n];
        if !pipe.is_configured() {
            return Err(Error::NotConfigured);
        }
        if pipe.is_busy() {
            return Err(Error::PipeBusy);
        }
        if buf.len() < length as usize {
            return Err(Error::BufferTooSmall);
        }

        pipe.begin(Some(buf), length);
        let len = transfer::next_txn_length(pipe);
        trace!("USBD: IN ep {}: {} bytes", ep, length);
        transfer::write_packet(&mut self.core, &mut self.dma, pipe, len);
        Ok(())
    }

    /// Arms OUT endpoint `ep` to receive up to `length` bytes into `buf`.
    pub fn read_endpoint(&mut self, ep: u8, buf: Buffer, length: u32) -> Result<()> {
        let n = data_endpoint(ep)?;
        let pipe = &mut self.rx[n];
        if !pipe.is_configured() {
            return Err(Error::NotConfigured);
        }
        if pipe.is_busy() {
            return Err(Error::PipeBusy);
        }
        buf.check_writable()?;
        if buf.len() < length as usize {
            return Err(Error::BufferTooSmall);
        }

        pipe.begin(Some(buf), length);
        transfer::read_prepare(&mut self.core, &mut self.dma, pipe);
        trace!("USBD: OUT ep {}: up to {} bytes", ep, length);

        // A packet that arrived before the buffer was posted is still NAK
        // free in the FIFO; software-serviced endpoints pick it up now.
        let mode1 = pipe.dma.is_some_and(|ch| self.dma.mode(ch) == Some(DmaMode::Mode1));
        if !mode1 && self.core.ep_csr(ep, PipeDir::Rx).contains(EpCsr::PKT_RDY) {
            self.rx_interrupt(ep, EpStatus::empty());
        }
        Ok(())
    }

    /// Answers every token on `ep` with STALL until [`Self::clear_stall`].
    pub fn stall_endpoint(&mut self, ep: u8, dir: PipeDir) -> Result<()> {
        let n = data_endpoint(ep)?;
        debug!("USBD: stall ep {} {:?}", ep, dir);
        self.core.ep_set(ep, dir, EpCsr::SEND_STALL);
        match dir {
            PipeDir::Tx => self.tx[n].stalled = true,
            PipeDir::Rx => self.rx[n].stalled = true,
        }
        Ok(())
    }

    /// Lifts the halt and resets the data toggle to DATA0.
    pub fn clear_stall(&mut self, ep: u8, dir: PipeDir) -> Result<()> {
        let n = data_endpoint(ep)?;
        debug!("USBD: clear stall ep {} {:?}", ep, dir);
        self.core.ep_clear(ep, dir, EpCsr::SEND_STALL | EpCsr::SENT_STALL);
        self.core.ep_set(ep, dir, EpCsr::CLR_DATA_TOG);
        match dir {
            PipeDir::Tx => self.tx[n].stalled = false,
            PipeDir::Rx => self.rx[n].stalled = false,
        }
        Ok(())
    }

    pub fn flush_fifo(&mut self, ep: u8, dir: PipeDir) -> Result<()> {
        if ep == 0 {
            self.core.cep_set(CepCsr::FLUSH_FIFO);
            return Ok(());
        }
        data_endpoint(ep)?;
        self.core.ep_set(ep, dir, EpCsr::FLUSH_FIFO);
        Ok(())
    }

    pub fn endpoint_idle(&self, ep: u8, dir: PipeDir) -> bool {
        let eps = match dir {
            PipeDir::Tx => &self.tx,
            PipeDir::Rx => &self.rx,
        };
        eps.get(ep as usize).is_some_and(|e| !e.is_busy())
    }

    pub(super) fn tx_interrupt(&mut self, ep: u8, status: EpStatus) {
        let Some(pipe) = self.tx.get_mut(ep as usize) else {
            return;
        };
        if !pipe.is_busy() {
            if !status.is_empty() {
                debug!("USBD: IN ep {} idle: {:?}", ep, status);
            }
            return;
        }

        if !status.is_success() {
            debug!("USBD: IN ep {}: {:?}", ep, status);
            self.complete_tx(ep, status);
            return;
        }

        if pipe.dma.is_some() {
            let count = transfer::dma_tx_count(&self.core, pipe);
            pipe.set_count(count);
            self.complete_tx(ep, status);
            return;
        }

        pipe.advance(pipe.txn_length);
        match transfer::tx_progress(pipe) {
            Progress::Complete => self.complete_tx(ep, status),
            Progress::Next(len) => {
                if len == 0 {
                    pipe.state = EpState::SendingZlp;
                }
                transfer::write_packet(&mut self.core, &mut self.dma, pipe, len);
            }
        }
    }

    pub(super) fn rx_interrupt(&mut self, ep: u8, status: EpStatus) {
        let Some(pipe) = self.rx.get_mut(ep as usize) else {
            return;
        };
        if !pipe.is_busy() {
            // stays in the FIFO until a buffer is posted
            trace!("USBD: OUT ep {} interrupt in {:?}", ep, pipe.state);
            return;
        }

        if !status.is_success() {
            debug!("USBD: OUT ep {}: {:?}", ep, status);
            self.complete_rx(ep, status);
            return;
        }

        if !self.core.ep_csr(ep, PipeDir::Rx).contains(EpCsr::PKT_RDY) {
            return;
        }
        let received = self.core.ep_rx_count(ep) as u32;

        if let Some(ch) = pipe.dma {
            if self.dma.mode(ch) == Some(DmaMode::Mode1) {
                let status = transfer::drain_rx_dma(&mut self.core, &mut self.dma, pipe, received);
                self.complete_rx(ep, status);
            } else {
                transfer::start_rx_dma_packet(&mut self.core, &mut self.dma, pipe, received);
            }
            return;
        }

        let status = transfer::read_packet(&mut self.core, pipe, received);
        self.core.ep_clear(ep, PipeDir::Rx, EpCsr::PKT_RDY);
        if !status.is_success() || transfer::rx_complete(pipe, received) {
            self.complete_rx(ep, status);
        } else {
            pipe.txn_length = transfer::next_txn_length(pipe);
        }
    }

    /// Interrupt entry point for the core's DMA interrupt line.
    pub fn dma_interrupt(&mut self) {
        for ev in self.dma.service(&mut self.core) {
            let ep = ev.ep;
            let Ok(n) = data_endpoint(ep) else {
                warn!("USBD: DMA event for endpoint {}", ep);
                continue;
            };

            match ev.dir {
                PipeDir::Tx => {
                    if !ev.status.is_success() {
                        self.complete_tx(ep, ev.status);
                        continue;
                    }
                    self.core.ep_clear(ep, PipeDir::Tx, EpCsr::DMA_ENABLE);
                    let pipe = &mut self.tx[n];
                    if transfer::dma_tx_done(&mut self.core, &self.dma, pipe, &ev) {
                        self.complete_tx(ep, EpStatus::empty());
                    }
                }
                PipeDir::Rx => {
                    if !ev.status.is_success() {
                        self.complete_rx(ep, ev.status);
                        continue;
                    }
                    let pipe = &mut self.rx[n];
                    if transfer::dma_rx_done(&mut self.core, &self.dma, pipe, &ev) {
                        self.complete_rx(ep, EpStatus::empty());
                    }
                }
            }
        }
    }

    fn complete_tx(&mut self, ep: u8, status: EpStatus) {
        let pipe = &mut self.tx[ep as usize];
        pipe.finish(status);
        let count = pipe.xfr_count;
        trace!("USBD: IN ep {} done, {} bytes, {:?}", ep, count, status);
        self.class.tx_done(ep, status, count);
    }

    fn complete_rx(&mut self, ep: u8, status: EpStatus) {
        let pipe = &mut self.rx[ep as usize];
        pipe.finish(status);
        let count = pipe.xfr_count;
        trace!("USBD: OUT ep {} done, {} bytes, {:?}", ep, count, status);
        self.class.rx_done(ep, status, count);
    }
}
