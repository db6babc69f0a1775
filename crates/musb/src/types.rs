//! Definitions of the small value types used throughout the stack.

use bitflags::bitflags;

/// Direction of a control request's data stage.
///
/// Many and various parts of the USB standard use this 1-bit field to indicate
/// in which direction information flows.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum UsbDirection {
    // HostToDevice
    #[default]
    Out = 0,
    // DeviceToHost
    In = 1,
}

impl UsbDirection {
    pub fn from_request_type(request_type: u8) -> Self {
        if request_type & 0x80 != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        }
    }
}

/// Which half of an endpoint slot a pipe uses.
///
/// In host mode a TX pipe carries OUT transactions and an RX pipe carries IN
/// transactions; in device mode it is the other way round from the bus's
/// point of view.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PipeDir {
    #[default]
    Tx,
    Rx,
}

/// Speed of USB communication.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    #[default]
    High = 0,
    Full = 1,
    Low = 2,
}

impl UsbSpeed {
    /// Converts `UsbSpeed` to a human-readable string representation.
    pub fn to_str(self) -> &'static str {
        match self {
            UsbSpeed::High => "480 Mb/s",
            UsbSpeed::Full => "12 Mb/s",
            UsbSpeed::Low => "1.5 Mb/s",
        }
    }
}

/// Transfer type of a pipe.
///
/// The high-bandwidth variants are carried in the data model so that
/// descriptors can be represented, but only one packet per (micro)frame is
/// ever scheduled for them.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    #[default]
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
    HighBandwidthIsochronous = 4,
    HighBandwidthInterrupt = 5,
}

impl TransferType {
    /// The 2-bit protocol value programmed into the host-mode type register.
    pub fn protocol_bits(self) -> u8 {
        match self {
            TransferType::Control => 0,
            TransferType::Isochronous | TransferType::HighBandwidthIsochronous => 1,
            TransferType::Bulk => 2,
            TransferType::Interrupt | TransferType::HighBandwidthInterrupt => 3,
        }
    }

    pub fn is_bulk(self) -> bool {
        self == TransferType::Bulk
    }

    pub fn is_periodic(self) -> bool {
        matches!(
            self,
            TransferType::Isochronous
                | TransferType::Interrupt
                | TransferType::HighBandwidthIsochronous
                | TransferType::HighBandwidthInterrupt
        )
    }

    pub fn is_isochronous(self) -> bool {
        matches!(
            self,
            TransferType::Isochronous | TransferType::HighBandwidthIsochronous
        )
    }
}

/// Lifecycle of a USB device as defined in 9.1 of the USB 2.0 manual.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    #[default]
    NotAttached = 0,
    Attached = 1,
    Powered = 2,
    Default = 3,
    Address = 4,
    Configured = 5,
    Suspended = 6,
}

/// OTG role reported by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A-device: supplies VBUS and acts as host.
    ADevice,
    /// B-device: peripheral side of the cable.
    BDevice,
}

/// VBUS level as reported by the session comparators.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VbusLevel {
    #[default]
    BelowSessionEnd = 0,
    AboveSessionEnd = 1,
    AboveAValid = 2,
    AboveVbusValid = 3,
}

/// USB 2.0 electrical test modes (7.1.20).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    J,
    K,
    SE0Nak,
    Packet,
    ForceEnable,
}

impl TestMode {
    pub fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            1 => Some(TestMode::J),
            2 => Some(TestMode::K),
            3 => Some(TestMode::SE0Nak),
            4 => Some(TestMode::Packet),
            5 => Some(TestMode::ForceEnable),
            _ => None,
        }
    }
}

bitflags! {
    /// Completion status of a transfer, as passed to every completion
    /// callback. An empty set means the transfer succeeded.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct EpStatus: u16 {
        /// Device TX: host asked for data while the FIFO was empty.
        const UNDERRUN = 1 << 0;
        /// Device RX: a packet arrived while the FIFO was still full. Also
        /// reported when a packet carries more data than was requested.
        const OVERRUN = 1 << 1;
        /// Device: a stall handshake was sent.
        const SENT_STALL = 1 << 2;
        const DATA_ERROR = 1 << 3;
        const PID_ERROR = 1 << 4;
        const ISO_INCOMPLETE = 1 << 5;
        /// Device control: the host ended the control transfer early.
        const SETUP_END = 1 << 6;
        /// Host: the device answered with a stall handshake.
        const RX_STALL = 1 << 7;
        /// Host: three attempts went unanswered.
        const NO_RESPONSE = 1 << 8;
        const NAK_TIMEOUT = 1 << 9;
        const DMA_BUS_ERROR = 1 << 10;
    }
}

impl EpStatus {
    pub fn is_success(self) -> bool {
        self.is_empty()
    }
}
