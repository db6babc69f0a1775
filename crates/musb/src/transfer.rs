//! Packetization, completion policy and FIFO/DMA movement shared by the host
//! and device data pipes.
//!
//! The role-specific controllers decide when to call these; everything that
//! only depends on the endpoint record and the core lives here.

use log::{debug, trace, warn};

use crate::dma::{DmaBurst, DmaCoordinator, DmaEvent, DmaMode};
use crate::endpoint::{EpState, Endpoint};
use crate::error::Result;
use crate::regs::{EpCsr, FifoLayout, UsbCore};
use crate::types::{EpStatus, PipeDir};

/// What a pipe should do after a transaction finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Complete,
    /// Start another transaction of this many bytes.
    Next(u32),
}

/// Bytes carried by the next transaction.
///
/// Bulk moves one packet per transaction. Interrupt and isochronous pipes
/// may fill both halves of a double-buffered FIFO.
pub fn next_txn_length(ep: &Endpoint) -> u32 {
    let per_txn = if ep.xfr_type.is_bulk() {
        ep.max_pkt_size.min(ep.fifo_size) as u32
    } else {
        ep.max_pkt_size as u32 * ep.buffer_count() as u32
    };
    ep.remaining().min(per_txn)
}

fn ended_on_full_packet(ep: &Endpoint) -> bool {
    ep.txn_count != 0 && ep.txn_count % ep.max_pkt_size as u32 == 0
}

/// Completion rule for TX without DMA, evaluated after `ep.advance`.
///
/// With `add_zlp`, a bulk transfer that ended on a full packet needs one more
/// zero-length transaction; the zero-length transaction itself completes it.
pub fn tx_progress(ep: &Endpoint) -> Progress {
    if ep.xfr_type.is_periodic() {
        return Progress::Complete;
    }
    if ep.xfr_count < ep.xfr_length {
        return Progress::Next(next_txn_length(ep));
    }
    if ep.xfr_type.is_bulk() && ep.policy.add_zlp && ended_on_full_packet(ep) {
        Progress::Next(0)
    } else {
        Progress::Complete
    }
}

/// Completion rule for RX without DMA, evaluated after `ep.advance(received)`.
///
/// A short packet (including a zero-length one) always ends the transfer.
/// Reaching the requested length on a full packet ends it too, unless the
/// pipe expects a terminating zero-length packet.
pub fn rx_complete(ep: &Endpoint, received: u32) -> bool {
    if ep.xfr_type.is_periodic() {
        return true;
    }
    if received < ep.max_pkt_size as u32 {
        return true;
    }
    if ep.xfr_count < ep.xfr_length {
        return false;
    }
    !(ep.xfr_type.is_bulk() && ep.policy.add_zlp)
}

/// True when DMA Mode1 moves the whole transfer and no endpoint interrupt
/// will follow the last packet.
pub fn dma_needs_no_trailer(ep: &Endpoint) -> bool {
    !ep.policy.add_zlp
        && ep.xfr_length != 0
        && ep.xfr_length % ep.max_pkt_size as u32 == 0
}

/// Programs FIFO geometry, packet size and DMA binding of `ep`, then enables
/// its interrupt. Any channel the slot held before is stopped and freed.
pub fn configure<C: UsbCore>(
    core: &mut C,
    dma: &mut DmaCoordinator,
    ep: &mut Endpoint,
) -> Result<()> {
    ep.validate_geometry()?;

    let num = ep.number;
    let dir = ep.dir;
    if let Some(ch) = ep.dma {
        dma.check_owner(ch, num, dir)?;
    }
    // a reconfigured pipe gives up its old channel, if any
    dma.release_pipe(core, num, dir);
    core.disable_ep_irq(num, dir);
    core.configure_fifo(
        num,
        dir,
        FifoLayout {
            addr: ep.fifo_addr,
            size: ep.fifo_size / ep.buffer_count(),
            dpb: ep.dpb,
        },
    );
    core.set_max_packet(num, dir, ep.max_pkt_size, ep.num_usb_pkt);
    core.ep_set(num, dir, EpCsr::CLR_DATA_TOG);

    if let Some(ch) = ep.dma {
        let mode = if ep.xfr_type.is_bulk() {
            DmaMode::Mode1
        } else {
            DmaMode::Mode0
        };
        dma.bind(core, ch, num, dir, mode, DmaBurst::Burst3, 0)?;
        if mode == DmaMode::Mode1 {
            core.ep_set(num, dir, EpCsr::DMA_MODE1 | EpCsr::DMA_ENABLE);
        } else {
            core.ep_clear(num, dir, EpCsr::DMA_MODE1 | EpCsr::DMA_ENABLE);
        }
    }

    ep.state = EpState::Idle;
    ep.stalled = false;
    core.enable_ep_irq(num, dir);
    debug!(
        "EP{} {:?}: configured {:?} maxpkt {} fifo {}@{:#x} dpb {} dma {:?}",
        num, dir, ep.xfr_type, ep.max_pkt_size, ep.fifo_size, ep.fifo_addr, ep.dpb, ep.dma
    );
    Ok(())
}

/// Loads the next transaction of a TX pipe.
///
/// With DMA, bulk pipes hand the whole remainder to a Mode1 burst with
/// AutoSet; other pipes move one transaction in Mode0. Without DMA the bytes
/// are copied into the FIFO and packet-ready is set.
pub fn write_packet<C: UsbCore>(
    core: &mut C,
    dma: &mut DmaCoordinator,
    ep: &mut Endpoint,
    txn_len: u32,
) {
    let num = ep.number;
    ep.txn_length = txn_len;
    ep.txn_count = 0;

    let Some(buf) = ep.buf else {
        // zero-length transfer without a buffer
        core.ep_set(num, PipeDir::Tx, EpCsr::PKT_RDY);
        return;
    };

    if let Some(ch) = ep.dma {
        dma.set_base(core, ch, buf.addr() + ep.xfr_count as usize);
        let count = if ep.xfr_type.is_bulk() {
            core.ep_set(num, PipeDir::Tx, EpCsr::DMA_ENABLE | EpCsr::DMA_MODE1 | EpCsr::AUTO);
            ep.remaining()
        } else {
            core.ep_clear(num, PipeDir::Tx, EpCsr::DMA_ENABLE);
            txn_len
        };
        if count != 0 {
            dma.start(core, ch, count);
            return;
        }
        // nothing for the DMA engine to move; send the empty packet directly
        core.ep_set(num, PipeDir::Tx, EpCsr::PKT_RDY);
        return;
    }

    // Safety: the buffer's construction contract keeps the region valid and
    // unaliased until this transfer's completion callback.
    let data = unsafe { buf.slice(ep.xfr_count as usize, txn_len as usize) };
    trace!("EP{} TX: {} bytes", num, txn_len);
    core.write_fifo(num, data);
    core.ep_set(num, PipeDir::Tx, EpCsr::PKT_RDY);
}

/// Arms an RX pipe for a new transfer.
///
/// Bulk pipes with DMA run a Mode1 burst over the whole length with
/// AutoClear; everything else is serviced packet by packet.
pub fn read_prepare<C: UsbCore>(core: &mut C, dma: &mut DmaCoordinator, ep: &mut Endpoint) {
    let num = ep.number;
    ep.txn_length = next_txn_length(ep);

    let (Some(ch), Some(buf)) = (ep.dma, ep.buf) else {
        return;
    };

    dma.set_base(core, ch, buf.addr());
    if ep.xfr_type.is_bulk() {
        dma.set_mode(core, ch, DmaMode::Mode1);
        core.ep_set(num, PipeDir::Rx, EpCsr::AUTO | EpCsr::DMA_ENABLE | EpCsr::DMA_MODE1);
        if ep.xfr_length != 0 {
            dma.start(core, ch, ep.xfr_length);
        }
    } else {
        core.ep_clear(num, PipeDir::Rx, EpCsr::AUTO);
        dma.set_mode(core, ch, DmaMode::Mode0);
        core.ep_clear(num, PipeDir::Rx, EpCsr::DMA_ENABLE | EpCsr::DMA_MODE1);
    }
}

/// Copies a received packet of `received` bytes from the FIFO into the
/// transfer buffer and accounts for it.
///
/// Returns the status to report if the packet did not fit.
pub fn read_packet<C: UsbCore>(core: &mut C, ep: &mut Endpoint, received: u32) -> EpStatus {
    let room = ep.remaining().min(received);
    ep.txn_length = room;

    if room != 0 {
        if let Some(buf) = ep.buf {
            // Safety: see `write_packet`; writability was checked when the
            // transfer was submitted.
            let dst = unsafe { buf.slice_mut(ep.xfr_count as usize, room as usize) };
            core.read_fifo(ep.number, dst);
        }
    }
    ep.advance(room);

    if room < received {
        warn!(
            "EP{} RX: {} byte packet with {} bytes of room",
            ep.number, received, room
        );
        core.ep_set(ep.number, PipeDir::Rx, EpCsr::FLUSH_FIFO);
        return EpStatus::OVERRUN;
    }
    EpStatus::empty()
}

/// Finishes a Mode1 RX burst that ended on a short packet.
///
/// The DMA engine is stopped before the FIFO is touched, the pipe drops back
/// to Mode0, the bytes moved by DMA are taken from the address delta and the
/// final partial packet is drained by software.
pub fn drain_rx_dma<C: UsbCore>(
    core: &mut C,
    dma: &mut DmaCoordinator,
    ep: &mut Endpoint,
    received: u32,
) -> EpStatus {
    let Some(ch) = ep.dma else {
        return read_packet(core, ep, received);
    };
    let num = ep.number;

    ep.state = EpState::RxDmaDraining;
    dma.stop(core, ch);
    core.ep_clear(num, PipeDir::Rx, EpCsr::AUTO | EpCsr::DMA_MODE1);
    dma.set_mode(core, ch, DmaMode::Mode0);

    let moved = dma.bytes_moved(core, ch);
    ep.set_count(moved);
    debug!(
        "EP{} RX: DMA moved {} bytes, draining {} from FIFO",
        num, moved, received
    );

    let status = read_packet(core, ep, received);
    core.ep_clear(num, PipeDir::Rx, EpCsr::PKT_RDY);
    status
}

/// Handles a TX channel's completion interrupt. Returns true when the
/// transfer is complete.
///
/// A Mode1 burst over an exact multiple of the max packet size without ZLP
/// gets no endpoint interrupt, so completion waits for the last packet to
/// leave the FIFO. Otherwise the final short (or zero-length) packet still
/// has to be released with packet-ready and the endpoint interrupt finishes
/// the transfer.
pub fn dma_tx_done<C: UsbCore>(
    core: &mut C,
    dma: &DmaCoordinator,
    ep: &mut Endpoint,
    ev: &DmaEvent,
) -> bool {
    let num = ep.number;
    if dma.mode(ev.channel) == Some(DmaMode::Mode1) && dma_needs_no_trailer(ep) {
        while core.ep_csr(num, PipeDir::Tx).contains(EpCsr::PKT_RDY) {
            core::hint::spin_loop();
        }
        let base = ep.buf.map_or(0, |b| b.addr());
        ep.set_count(ev.addr.saturating_sub(base) as u32);
        true
    } else {
        core.ep_set(num, PipeDir::Tx, EpCsr::PKT_RDY);
        false
    }
}

/// Byte count of a DMA TX transfer at its endpoint completion interrupt.
pub fn dma_tx_count<C: UsbCore>(core: &C, ep: &Endpoint) -> u32 {
    match (ep.dma, ep.buf) {
        (Some(ch), Some(buf)) => core.dma_addr(ch).saturating_sub(buf.addr()) as u32,
        _ => ep.xfr_count,
    }
}

/// Starts a Mode0 DMA move of one received packet out of the FIFO.
pub fn start_rx_dma_packet<C: UsbCore>(
    core: &mut C,
    dma: &mut DmaCoordinator,
    ep: &mut Endpoint,
    received: u32,
) -> bool {
    let (Some(ch), Some(buf)) = (ep.dma, ep.buf) else {
        return false;
    };
    let room = ep.remaining().min(received);
    ep.txn_length = room;
    dma.set_base(core, ch, buf.addr() + ep.xfr_count as usize);
    dma.start(core, ch, room);
    true
}

/// Handles an RX channel's completion interrupt. Returns true when the
/// transfer is complete.
pub fn dma_rx_done<C: UsbCore>(
    core: &mut C,
    dma: &DmaCoordinator,
    ep: &mut Endpoint,
    ev: &DmaEvent,
) -> bool {
    let num = ep.number;
    let base = ep.buf.map_or(0, |b| b.addr());
    match dma.mode(ev.channel) {
        Some(DmaMode::Mode0) => {
            ep.set_count(ev.addr.saturating_sub(base) as u32);
            core.ep_clear(num, PipeDir::Rx, EpCsr::PKT_RDY);
            true
        }
        _ if dma_needs_no_trailer(ep) => {
            ep.set_count(ev.addr.saturating_sub(base) as u32);
            true
        }
        // a short packet ends the burst; the endpoint interrupt drains it
        _ => false,
    }
}
