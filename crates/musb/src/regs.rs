//! Register, FIFO and DMA primitives consumed by the controllers.
//!
//! The bit layout of the core's registers is owned by the platform; the
//! controllers only see the semantic flag sets below. A platform crate maps
//! each flag onto the matching CSR bit for the current role.

use bitflags::bitflags;

use crate::dma::{DmaChannel, DmaControl};
use crate::types::{PipeDir, Role, TestMode, UsbSpeed, VbusLevel};

bitflags! {
    /// Bus-event interrupt sources (INTRUSB layout).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct UsbIrq: u8 {
        const SUSPEND = 1 << 0;
        const RESUME = 1 << 1;
        /// Reset in device mode, babble in host mode.
        const RESET_BABBLE = 1 << 2;
        const SOF = 1 << 3;
        const CONNECT = 1 << 4;
        const DISCONNECT = 1 << 5;
        const SESSION_REQUEST = 1 << 6;
        const VBUS_ERROR = 1 << 7;
    }
}

bitflags! {
    /// Control endpoint CSR.
    ///
    /// Device and host roles share bit positions with different meanings, so
    /// several names alias the same bit.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct CepCsr: u16 {
        const RX_PKT_RDY = 1 << 0;
        const TX_PKT_RDY = 1 << 1;
        /// Device: SentStall. Host: RxStall.
        const STALL = 1 << 2;
        const DATA_END = 1 << 3;
        const SETUP_PKT = 1 << 3;
        const SETUP_END = 1 << 4;
        /// Host: three attempts without a response.
        const ERROR = 1 << 4;
        const SEND_STALL = 1 << 5;
        const REQ_PKT = 1 << 5;
        const SERVICED_RX_PKT_RDY = 1 << 6;
        const STATUS_PKT = 1 << 6;
        const SERVICED_SETUP_END = 1 << 7;
        const NAK_TIMEOUT = 1 << 7;
        const FLUSH_FIFO = 1 << 8;
        const DATA_TOGGLE = 1 << 9;
        const DATA_TOGGLE_WE = 1 << 10;
        const DIS_PING = 1 << 11;
    }
}

bitflags! {
    /// Data endpoint CSR, TX or RX half.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct EpCsr: u32 {
        /// TxPktRdy / RxPktRdy.
        const PKT_RDY = 1 << 0;
        /// TX: FIFO still holds a packet. RX: FIFO full.
        const FIFO_NOT_EMPTY = 1 << 1;
        const FLUSH_FIFO = 1 << 2;
        const UNDERRUN = 1 << 3;
        const OVERRUN = 1 << 4;
        const DATA_ERROR = 1 << 5;
        const PID_ERROR = 1 << 6;
        const ISO_INCOMPLETE = 1 << 7;
        const SEND_STALL = 1 << 8;
        const SENT_STALL = 1 << 9;
        const RX_STALL = 1 << 10;
        /// Host: three attempts without a response.
        const RETRY_ERROR = 1 << 11;
        const NAK_TIMEOUT = 1 << 12;
        const REQ_PKT = 1 << 13;
        const CLR_DATA_TOG = 1 << 14;
        const ISO = 1 << 15;
        /// AutoSet on TX, AutoClear on RX.
        const AUTO = 1 << 16;
        const AUTO_REQ = 1 << 17;
        const DMA_ENABLE = 1 << 18;
        const DMA_MODE1 = 1 << 19;
    }
}

/// Dynamic FIFO placement of one endpoint half.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FifoLayout {
    pub addr: u16,
    /// Size of one packet buffer; the FIFO holds two of these when `dpb` is set.
    pub size: u16,
    pub dpb: bool,
}

/// Host-mode addressing of a pipe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostTarget {
    pub func_addr: u8,
    pub ep_num: u8,
    /// Protocol bits, see [`crate::types::TransferType::protocol_bits`].
    pub protocol: u8,
    pub speed: UsbSpeed,
    /// Encoded polling interval / NAK limit.
    pub interval: u8,
}

/// The register/FIFO/DMA primitives of one MUSB-style core, plus the two
/// platform services the state machines need.
///
/// Interrupt status reads clear the status they return.
pub trait UsbCore {
    fn read_usb_irq(&mut self) -> UsbIrq;
    fn read_tx_irq(&mut self) -> u16;
    fn read_rx_irq(&mut self) -> u16;
    fn enable_usb_irq(&mut self, irq: UsbIrq);
    fn disable_usb_irq(&mut self, irq: UsbIrq);
    fn enable_ep_irq(&mut self, ep: u8, dir: PipeDir);
    fn disable_ep_irq(&mut self, ep: u8, dir: PipeDir);

    fn role(&self) -> Role;
    fn is_host_mode(&self) -> bool;
    /// Set once the core negotiated high speed (POWER.HSMode).
    fn is_hs_mode(&self) -> bool;
    /// Speed of the attached device as seen by the host-mode line state.
    fn line_speed(&self) -> UsbSpeed;
    fn vbus_level(&self) -> VbusLevel;
    fn set_session(&mut self, on: bool);
    fn is_session_on(&self) -> bool;
    fn set_bus_reset(&mut self, asserted: bool);
    fn set_resume(&mut self, asserted: bool);
    fn set_suspend_mode(&mut self, enabled: bool);
    fn is_suspended(&self) -> bool;
    fn set_soft_connect(&mut self, connected: bool);
    fn enable_hs(&mut self, enabled: bool);
    fn set_function_address(&mut self, addr: u8);
    fn set_test_mode(&mut self, mode: TestMode);
    fn set_host_target(&mut self, ep: u8, dir: PipeDir, target: HostTarget);
    fn set_cep_nak_limit(&mut self, limit: u8);
    fn set_reqpkt_count(&mut self, ep: u8, count: u32);
    fn frame_number(&self) -> u16;

    fn cep_csr(&self) -> CepCsr;
    fn cep_set(&mut self, bits: CepCsr);
    fn cep_clear(&mut self, bits: CepCsr);
    fn cep_rx_count(&self) -> u16;

    fn ep_csr(&self, ep: u8, dir: PipeDir) -> EpCsr;
    fn ep_set(&mut self, ep: u8, dir: PipeDir, bits: EpCsr);
    fn ep_clear(&mut self, ep: u8, dir: PipeDir, bits: EpCsr);
    fn ep_rx_count(&self, ep: u8) -> u16;
    fn configure_fifo(&mut self, ep: u8, dir: PipeDir, layout: FifoLayout);
    fn set_max_packet(&mut self, ep: u8, dir: PipeDir, max_pkt: u16, num_pkt: u8);

    fn write_fifo(&mut self, ep: u8, data: &[u8]);
    fn read_fifo(&mut self, ep: u8, data: &mut [u8]);

    fn dma_configure(&mut self, ch: DmaChannel, ctrl: DmaControl);
    fn dma_set_addr(&mut self, ch: DmaChannel, addr: usize);
    fn dma_addr(&self, ch: DmaChannel) -> usize;
    fn dma_set_count(&mut self, ch: DmaChannel, count: u32);
    fn dma_start(&mut self, ch: DmaChannel);
    fn dma_stop(&mut self, ch: DmaChannel);
    fn read_dma_irq(&mut self) -> u8;
    fn dma_bus_error(&self, ch: DmaChannel) -> bool;

    /// Free-running millisecond counter fed by the platform's 1 ms tick.
    fn millis(&self) -> u32;
    fn delay_us(&mut self, us: u32);
}
