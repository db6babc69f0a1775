//! Interrupt snapshot and per-endpoint error classification.
//!
//! Both controllers read the three status bitmaps exactly once per interrupt
//! and then walk them. Latched error bits are read and cleared here, so no
//! error condition survives the handler that observed it (NAK timeout on the
//! host side excepted: it stays set until the pipe is aborted, otherwise the
//! core keeps retrying the transaction).

use tinyvec::ArrayVec;

use crate::regs::{EpCsr, UsbCore, UsbIrq};
use crate::types::{EpStatus, PipeDir};
use crate::MAX_ENDPOINTS;

/// One read of the bus-event, TX and RX interrupt status registers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IrqSnapshot {
    pub usb: UsbIrq,
    pub tx: u16,
    pub rx: u16,
}

impl IrqSnapshot {
    /// Reads (and thereby clears) all three status registers.
    pub fn read<C: UsbCore>(core: &mut C) -> Self {
        Self {
            usb: core.read_usb_irq(),
            tx: core.read_tx_irq(),
            rx: core.read_rx_irq(),
        }
    }

    pub fn control_endpoint(&self) -> bool {
        self.tx & 1 != 0
    }

    pub fn tx_endpoints(&self) -> ArrayVec<[u8; MAX_ENDPOINTS]> {
        pending_endpoints(self.tx)
    }

    pub fn rx_endpoints(&self) -> ArrayVec<[u8; MAX_ENDPOINTS]> {
        pending_endpoints(self.rx)
    }
}

/// Data endpoint numbers with their bit set, in ascending order. Bit 0 (the
/// control endpoint) is never included.
pub fn pending_endpoints(bits: u16) -> ArrayVec<[u8; MAX_ENDPOINTS]> {
    let mut eps = ArrayVec::new();
    for ep in 1..MAX_ENDPOINTS as u8 {
        if bits & (1 << ep) != 0 {
            eps.push(ep);
        }
    }
    eps
}

fn take_latched<C: UsbCore>(
    core: &mut C,
    ep: u8,
    dir: PipeDir,
    csr: EpCsr,
    bit: EpCsr,
    status: EpStatus,
    clear: bool,
) -> EpStatus {
    if !csr.contains(bit) {
        return EpStatus::empty();
    }
    if clear {
        core.ep_clear(ep, dir, bit);
    }
    status
}

/// Host IN pipe: stall handshake, NAK limit reached, no response.
pub fn classify_host_rx<C: UsbCore>(core: &mut C, ep: u8) -> EpStatus {
    let csr = core.ep_csr(ep, PipeDir::Rx);
    take_latched(core, ep, PipeDir::Rx, csr, EpCsr::RX_STALL, EpStatus::RX_STALL, true)
        | take_latched(core, ep, PipeDir::Rx, csr, EpCsr::NAK_TIMEOUT, EpStatus::NAK_TIMEOUT, false)
        | take_latched(core, ep, PipeDir::Rx, csr, EpCsr::RETRY_ERROR, EpStatus::NO_RESPONSE, true)
}

/// Host OUT pipe: no response, stall handshake, NAK limit reached.
pub fn classify_host_tx<C: UsbCore>(core: &mut C, ep: u8) -> EpStatus {
    let csr = core.ep_csr(ep, PipeDir::Tx);
    take_latched(core, ep, PipeDir::Tx, csr, EpCsr::RETRY_ERROR, EpStatus::NO_RESPONSE, true)
        | take_latched(core, ep, PipeDir::Tx, csr, EpCsr::RX_STALL, EpStatus::RX_STALL, true)
        | take_latched(core, ep, PipeDir::Tx, csr, EpCsr::NAK_TIMEOUT, EpStatus::NAK_TIMEOUT, false)
}

/// Device OUT endpoint.
pub fn classify_device_rx<C: UsbCore>(core: &mut C, ep: u8) -> EpStatus {
    let csr = core.ep_csr(ep, PipeDir::Rx);
    let dir = PipeDir::Rx;
    take_latched(core, ep, dir, csr, EpCsr::OVERRUN, EpStatus::OVERRUN, true)
        | take_latched(core, ep, dir, csr, EpCsr::SENT_STALL, EpStatus::SENT_STALL, true)
        | take_latched(core, ep, dir, csr, EpCsr::DATA_ERROR, EpStatus::DATA_ERROR, true)
        | take_latched(core, ep, dir, csr, EpCsr::PID_ERROR, EpStatus::PID_ERROR, true)
        | take_latched(core, ep, dir, csr, EpCsr::ISO_INCOMPLETE, EpStatus::ISO_INCOMPLETE, true)
}

/// Device IN endpoint.
pub fn classify_device_tx<C: UsbCore>(core: &mut C, ep: u8) -> EpStatus {
    let csr = core.ep_csr(ep, PipeDir::Tx);
    take_latched(core, ep, PipeDir::Tx, csr, EpCsr::UNDERRUN, EpStatus::UNDERRUN, true)
        | take_latched(core, ep, PipeDir::Tx, csr, EpCsr::SENT_STALL, EpStatus::SENT_STALL, true)
}
