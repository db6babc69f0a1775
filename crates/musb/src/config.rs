//! Tunables for the two controller roles and per-pipe geometry.

use crate::dma::DmaChannel;
use crate::endpoint::TransferPolicy;
use crate::types::{TransferType, UsbSpeed};

/// Host-role timing and policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Time a connection must be stable before the bus is reset.
    pub connect_debounce_ms: u32,
    pub reset_assert_ms: u32,
    pub reset_settle_ms: u32,
    /// Recovery time after SET_ADDRESS (USB 2.0 9.2.6.3 requires 2 ms).
    pub set_address_settle_ms: u32,
    /// Non-zero address handed to the single attached device.
    pub device_address: u8,
    /// NAK limit of the control pipe, in (micro)frames; a power of two.
    pub control_nak_interval: u32,
    pub control_fifo_size: u16,
    /// Bus power budget in units of 2 mA, compared against bMaxPower.
    pub max_power: u8,
    pub accept_full_speed: bool,
    pub accept_low_speed: bool,
    /// Duration of host-driven resume signalling.
    pub resume_ms: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            connect_debounce_ms: 100,
            reset_assert_ms: 20,
            reset_settle_ms: 20,
            set_address_settle_ms: 5,
            device_address: 0x10,
            control_nak_interval: 32768,
            control_fifo_size: 64,
            max_power: 250,
            accept_full_speed: true,
            accept_low_speed: true,
            resume_ms: 40,
        }
    }
}

/// Device-role policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Highest speed the device will negotiate.
    pub speed: UsbSpeed,
    pub control_max_packet: u16,
    /// Busy-wait between the SET_ADDRESS status handshake and the address
    /// register write.
    pub set_address_delay_us: u32,
    pub self_powered: bool,
    pub interface_count: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            speed: UsbSpeed::High,
            control_max_packet: 64,
            set_address_delay_us: 100,
            self_powered: true,
            interface_count: 1,
        }
    }
}

/// Geometry and policy of one data pipe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    pub number: u8,
    pub xfr_type: TransferType,
    pub max_pkt_size: u16,
    pub fifo_addr: u16,
    pub fifo_size: u16,
    pub dpb: bool,
    pub dma: Option<DmaChannel>,
    pub policy: TransferPolicy,
    /// Host mode: endpoint number on the target device.
    pub target_ep: u8,
    /// Host mode: polling interval (periodic) or NAK limit (bulk), in
    /// (micro)frames.
    pub interval: u32,
}
