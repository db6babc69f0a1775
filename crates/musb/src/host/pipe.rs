//! Host data pipes: OUT pipes on the TX half of an endpoint slot, IN pipes on
//! the RX half.

use log::{debug, trace, warn};

use super::{HostClassDriver, HostController, HostEvents};
use crate::buffer::Buffer;
use crate::config::EndpointConfig;
use crate::endpoint::{data_endpoint, EpState, Endpoint};
use crate::error::{Error, Result};
use crate::regs::{EpCsr, HostTarget, UsbCore};
use crate::transfer::{self, Progress};
use crate::types::{EpStatus, PipeDir, TransferType, UsbSpeed};

/// Encodes a polling interval or NAK limit for the host interval register.
///
/// Full/low-speed interrupt pipes take the interval in frames as is (1..=255).
/// Everything else takes a power of two `2^(n-1)` (micro)frames, encoded as
/// `n`. Bulk and control pipes may pass 0 to disable the NAK limit.
pub fn encode_interval(xfr_type: TransferType, speed: UsbSpeed, interval: u32) -> Result<u8> {
    let is_interrupt = matches!(
        xfr_type,
        TransferType::Interrupt | TransferType::HighBandwidthInterrupt
    );
    if is_interrupt && speed != UsbSpeed::High {
        return match interval {
            1..=255 => Ok(interval as u8),
            _ => Err(Error::InvalidInterval(interval)),
        };
    }
    if interval == 0 && matches!(xfr_type, TransferType::Bulk | TransferType::Control) {
        return Ok(0);
    }
    if interval.is_power_of_two() && interval <= 32768 {
        Ok(interval.trailing_zeros() as u8 + 1)
    } else {
        Err(Error::InvalidInterval(interval))
    }
}

impl<C: UsbCore, U: HostEvents, K: HostClassDriver> HostController<C, U, K> {
    /// Sets up the TX half of slot `config.number` to carry OUT transfers to
    /// endpoint `config.target_ep` of the device at `target_addr`.
    pub fn configure_out_pipe(&mut self, target_addr: u8, config: &EndpointConfig) -> Result<()> {
        self.configure_pipe(PipeDir::Tx, target_addr, config)
    }

    /// Sets up the RX half of slot `config.number` for IN transfers.
    pub fn configure_in_pipe(&mut self, target_addr: u8, config: &EndpointConfig) -> Result<()> {
        self.configure_pipe(PipeDir::Rx, target_addr, config)
    }

    fn configure_pipe(
        &mut self,
        dir: PipeDir,
        target_addr: u8,
        config: &EndpointConfig,
    ) -> Result<()> {
        let n = data_endpoint(config.number)?;
        let pipes = match dir {
            PipeDir::Tx => &mut self.tx,
            PipeDir::Rx => &mut self.rx,
        };
        if pipes[n].is_busy() {
            return Err(Error::PipeBusy);
        }

        let interval = encode_interval(config.xfr_type, self.device.speed, config.interval)?;
        let mut ep = Endpoint::new(dir, config);
        ep.target_addr = target_addr;
        ep.validate_geometry()?;

        self.core.set_host_target(
            config.number,
            dir,
            HostTarget {
                func_addr: target_addr,
                ep_num: config.target_ep,
                protocol: config.xfr_type.protocol_bits(),
                speed: self.device.speed,
                interval,
            },
        );
        transfer::configure(&mut self.core, &mut self.dma, &mut ep)?;
        pipes[n] = ep;
        Ok(())
    }

    /// Starts an OUT transfer of `length` bytes from `buf`.
    pub fn write_out_pipe(&mut self, pipe: u8, buf: Buffer, length: u32) -> Result<()> {
        let n = data_endpoint(pipe)?;
        let ep = &mut self.tx[n];
        if !ep.is_configured() {
            return Err(Error::NotConfigured);
        }
        if ep.is_busy() {
            return Err(Error::PipeBusy);
        }
        if buf.len() < length as usize {
            return Err(Error::BufferTooSmall);
        }

        ep.begin(Some(buf), length);
        let len = transfer::next_txn_length(ep);
        trace!("USBH: OUT pipe {}: {} bytes", pipe, length);
        transfer::write_packet(&mut self.core, &mut self.dma, ep, len);
        Ok(())
    }

    /// Starts an IN transfer of up to `length` bytes into `buf`.
    ///
    /// Bulk pipes with DMA let the core issue the IN tokens for all full
    /// packets on its own.
    pub fn read_in_pipe(&mut self, pipe: u8, buf: Buffer, length: u32) -> Result<()> {
        let n = data_endpoint(pipe)?;
        let ep = &mut self.rx[n];
        if !ep.is_configured() {
            return Err(Error::NotConfigured);
        }
        if ep.is_busy() {
            return Err(Error::PipeBusy);
        }
        buf.check_writable()?;
        if buf.len() < length as usize {
            return Err(Error::BufferTooSmall);
        }

        ep.begin(Some(buf), length);
        if ep.dma.is_some() && ep.xfr_type.is_bulk() && length >= ep.max_pkt_size as u32 {
            self.core.set_reqpkt_count(pipe, length / ep.max_pkt_size as u32);
            self.core.ep_set(pipe, PipeDir::Rx, EpCsr::AUTO_REQ);
        }
        transfer::read_prepare(&mut self.core, &mut self.dma, ep);
        trace!("USBH: IN pipe {}: up to {} bytes", pipe, length);
        self.core.ep_set(pipe, PipeDir::Rx, EpCsr::REQ_PKT);
        Ok(())
    }

    pub fn out_pipe_idle(&self, pipe: u8) -> bool {
        self.tx.get(pipe as usize).is_some_and(|ep| !ep.is_busy())
    }

    pub fn in_pipe_idle(&self, pipe: u8) -> bool {
        self.rx.get(pipe as usize).is_some_and(|ep| !ep.is_busy())
    }

    /// Cancels the OUT transfer on `pipe`. No completion is reported.
    pub fn abort_out_pipe(&mut self, pipe: u8) -> Result<()> {
        let n = data_endpoint(pipe)?;
        debug!("USBH: abort OUT pipe {}", pipe);
        let ep = &mut self.tx[n];
        ep.state = EpState::Aborted;

        self.core.ep_clear(pipe, PipeDir::Tx, EpCsr::AUTO);
        self.core.ep_set(pipe, PipeDir::Tx, EpCsr::FLUSH_FIFO);
        self.core.ep_clear(pipe, PipeDir::Tx, EpCsr::DMA_ENABLE);
        self.core.ep_clear(
            pipe,
            PipeDir::Tx,
            EpCsr::RETRY_ERROR | EpCsr::RX_STALL | EpCsr::NAK_TIMEOUT,
        );
        if let Some(ch) = ep.dma {
            self.dma.stop(&mut self.core, ch);
        }
        Ok(())
    }

    /// Cancels the IN transfer on `pipe`, discarding any packet already in
    /// the FIFO. No completion is reported.
    pub fn abort_in_pipe(&mut self, pipe: u8) -> Result<()> {
        let n = data_endpoint(pipe)?;
        debug!("USBH: abort IN pipe {}", pipe);

        self.core.ep_clear(
            pipe,
            PipeDir::Rx,
            EpCsr::REQ_PKT | EpCsr::NAK_TIMEOUT | EpCsr::RX_STALL | EpCsr::RETRY_ERROR,
        );
        if self.core.ep_csr(pipe, PipeDir::Rx).contains(EpCsr::PKT_RDY) {
            self.core.ep_set(pipe, PipeDir::Rx, EpCsr::FLUSH_FIFO);
            self.core.ep_clear(pipe, PipeDir::Rx, EpCsr::PKT_RDY);
        }

        let ep = &mut self.rx[n];
        ep.state = EpState::Aborted;
        if let Some(ch) = ep.dma {
            self.dma.stop(&mut self.core, ch);
        }
        Ok(())
    }

    pub(super) fn tx_interrupt(&mut self, pipe: u8, status: EpStatus) {
        let Some(ep) = self.tx.get_mut(pipe as usize) else {
            return;
        };
        if !ep.is_busy() {
            trace!("USBH: OUT pipe {} interrupt in {:?}", pipe, ep.state);
            return;
        }

        if !status.is_success() {
            debug!("USBH: OUT pipe {}: {:?}", pipe, status);
            self.complete_out(pipe, status);
            return;
        }

        if ep.dma.is_some() {
            let count = transfer::dma_tx_count(&self.core, ep);
            ep.set_count(count);
            self.complete_out(pipe, status);
            return;
        }

        ep.advance(ep.txn_length);
        match transfer::tx_progress(ep) {
            Progress::Complete => self.complete_out(pipe, status),
            Progress::Next(len) => {
                if len == 0 {
                    ep.state = EpState::SendingZlp;
                }
                transfer::write_packet(&mut self.core, &mut self.dma, ep, len);
            }
        }
    }

    pub(super) fn rx_interrupt(&mut self, pipe: u8, status: EpStatus) {
        let Some(ep) = self.rx.get_mut(pipe as usize) else {
            return;
        };
        if !ep.is_busy() {
            trace!("USBH: IN pipe {} interrupt in {:?}", pipe, ep.state);
            return;
        }

        if !status.is_success() {
            debug!("USBH: IN pipe {}: {:?}", pipe, status);
            self.complete_in(pipe, status);
            return;
        }

        let csr = self.core.ep_csr(pipe, PipeDir::Rx);
        if !csr.contains(EpCsr::PKT_RDY) {
            return;
        }
        let received = self.core.ep_rx_count(pipe) as u32;

        if ep.dma.is_some() {
            if ep.xfr_type.is_bulk() {
                let status = transfer::drain_rx_dma(&mut self.core, &mut self.dma, ep, received);
                self.core.ep_clear(pipe, PipeDir::Rx, EpCsr::REQ_PKT | EpCsr::AUTO_REQ);
                self.complete_in(pipe, status);
            } else {
                transfer::start_rx_dma_packet(&mut self.core, &mut self.dma, ep, received);
            }
            return;
        }

        let status = transfer::read_packet(&mut self.core, ep, received);
        self.core.ep_clear(pipe, PipeDir::Rx, EpCsr::PKT_RDY);
        if !status.is_success() || transfer::rx_complete(ep, received) {
            self.complete_in(pipe, status);
        } else {
            ep.txn_length = transfer::next_txn_length(ep);
            self.core.ep_set(pipe, PipeDir::Rx, EpCsr::REQ_PKT);
        }
    }

    /// Interrupt entry point for the core's DMA interrupt line.
    pub fn dma_interrupt(&mut self) {
        for ev in self.dma.service(&mut self.core) {
            let pipe = ev.ep;
            let Some(n) = data_endpoint(pipe).ok() else {
                warn!("USBH: DMA event for endpoint {}", pipe);
                continue;
            };

            match ev.dir {
                PipeDir::Tx => {
                    if !ev.status.is_success() {
                        self.complete_out(pipe, ev.status);
                        continue;
                    }
                    self.core.ep_clear(pipe, PipeDir::Tx, EpCsr::DMA_ENABLE);
                    let ep = &mut self.tx[n];
                    if transfer::dma_tx_done(&mut self.core, &self.dma, ep, &ev) {
                        self.complete_out(pipe, EpStatus::empty());
                    }
                }
                PipeDir::Rx => {
                    if !ev.status.is_success() {
                        self.complete_in(pipe, ev.status);
                        continue;
                    }
                    let ep = &mut self.rx[n];
                    if transfer::dma_rx_done(&mut self.core, &self.dma, ep, &ev) {
                        self.core.ep_clear(
                            pipe,
                            PipeDir::Rx,
                            EpCsr::REQ_PKT | EpCsr::AUTO | EpCsr::AUTO_REQ,
                        );
                        self.complete_in(pipe, EpStatus::empty());
                    }
                }
            }
        }
    }

    fn complete_out(&mut self, pipe: u8, status: EpStatus) {
        let ep = &mut self.tx[pipe as usize];
        ep.finish(status);
        let (addr, count) = (ep.target_addr, ep.xfr_count);
        trace!("USBH: OUT pipe {} done, {} bytes, {:?}", pipe, count, status);
        if let Some(class) = self.class.as_mut() {
            class.tx_done(addr, pipe, status, count);
        }
    }

    fn complete_in(&mut self, pipe: u8, status: EpStatus) {
        let ep = &mut self.rx[pipe as usize];
        ep.finish(status);
        let (addr, count) = (ep.target_addr, ep.xfr_count);
        trace!("USBH: IN pipe {} done, {} bytes, {:?}", pipe, count, status);
        if let Some(class) = self.class.as_mut() {
            class.rx_done(addr, pipe, status, count);
        }
    }
}
