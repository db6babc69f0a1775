//! Device role: endpoint 0 protocol, standard requests that drive the device
//! state, and the data endpoints.
//!
//! Everything here runs from [`DeviceController::interrupt`] and
//! [`DeviceController::dma_interrupt`]; the device side has nothing that
//! needs a polling task.

use log::{debug, info, trace};

use crate::buffer::Buffer;
use crate::config::DeviceConfig;
use crate::dma::DmaCoordinator;
use crate::endpoint::Endpoint;
use crate::irq::{classify_device_rx, classify_device_tx, IrqSnapshot};
use crate::regs::{CepCsr, UsbCore, UsbIrq};
use crate::request::{Recipient, SetupPacket};
use crate::types::{DeviceState, EpStatus, PipeDir, TestMode, UsbSpeed};
use crate::MAX_ENDPOINTS;

mod control;
mod pipe;

pub use control::CepState;
pub use pipe::max_packet_limit;

use control::{CepSource, Pending};

/// Address reported to [`DeviceClassDriver::release`] when the cable is
/// pulled rather than the configuration dropped.
pub const RELEASE_ON_DISCONNECT: u8 = 0xFF;

/// How the class driver answers a class or vendor request.
#[derive(Debug, Clone, Copy)]
pub enum Response {
    Stall,
    /// Zero-length request accepted.
    Ack,
    /// IN: the bytes to send (clamped to wLength). OUT: the buffer that
    /// receives wLength bytes.
    Data(Buffer),
}

/// The function behind the device: descriptors, class requests and the data
/// endpoint completions.
pub trait DeviceClassDriver {
    /// SET_CONFIGURATION selected `config` (non-zero) at `speed`.
    fn init(&mut self, _config: u8, _speed: UsbSpeed) {}

    /// The configuration went away: 0 on SET_CONFIGURATION(0),
    /// [`RELEASE_ON_DISCONNECT`] on disconnect.
    fn release(&mut self, _config: u8) {}

    fn process_request(&mut self, _setup: &SetupPacket) -> Response {
        Response::Stall
    }

    /// Descriptor for GET_DESCRIPTOR. `None` stalls the request.
    fn get_descriptor(
        &mut self,
        _recipient: Recipient,
        _desc_type: u8,
        _index: u8,
        _speed: UsbSpeed,
    ) -> Option<Buffer> {
        None
    }

    /// IN data stage of a control request finished (or was cut short).
    fn cep_tx_done(&mut self, _status: EpStatus) {}

    /// OUT data stage of a control request finished (or was cut short).
    fn cep_rx_done(&mut self, _status: EpStatus) {}

    fn tx_done(&mut self, _ep: u8, _status: EpStatus, _count: u32) {}

    fn rx_done(&mut self, _ep: u8, _status: EpStatus, _count: u32) {}

    fn sof(&mut self, _frame: u16) {}
}

pub struct DeviceController<C: UsbCore, K: DeviceClassDriver> {
    core: C,
    config: DeviceConfig,
    class: K,

    state: DeviceState,
    state_at_suspend: DeviceState,
    address: u8,
    speed: UsbSpeed,
    active_config: u8,
    active_interface: u8,
    remote_wakeup: bool,

    cep: Endpoint,
    cep_state: CepState,
    cep_source: CepSource,
    /// A reply shorter than wLength that ends on a full packet still owes
    /// the host a zero-length packet.
    cep_zlp: bool,
    setup: SetupPacket,
    /// Backing store for the 1- and 2-byte standard request replies.
    scratch: [u8; 2],
    pending: Pending,

    tx: [Endpoint; MAX_ENDPOINTS],
    rx: [Endpoint; MAX_ENDPOINTS],
    dma: DmaCoordinator,
}

impl<C: UsbCore, K: DeviceClassDriver> DeviceController<C, K> {
    pub fn new(core: C, config: DeviceConfig, class: K) -> Self {
        Self {
            core,
            config,
            class,
            state: DeviceState::NotAttached,
            state_at_suspend: DeviceState::NotAttached,
            address: 0,
            speed: config.speed,
            active_config: 0,
            active_interface: 0,
            remote_wakeup: false,
            cep: Endpoint::control(config.control_max_packet, config.control_max_packet),
            cep_state: CepState::Idle,
            cep_source: CepSource::None,
            cep_zlp: false,
            setup: SetupPacket::default(),
            scratch: [0; 2],
            pending: Pending::None,
            tx: [Endpoint::default(); MAX_ENDPOINTS],
            rx: [Endpoint::default(); MAX_ENDPOINTS],
            dma: DmaCoordinator::new(),
        }
    }

    /// Brings the core up in device mode at the configured speed. The
    /// pull-up stays off until [`DeviceController::soft_connect`].
    pub fn init(&mut self) {
        self.core.enable_hs(self.config.speed == UsbSpeed::High);
        let _ = self.core.read_usb_irq();
        for ep in 1..MAX_ENDPOINTS as u8 {
            self.core.disable_ep_irq(ep, PipeDir::Tx);
            self.core.disable_ep_irq(ep, PipeDir::Rx);
        }
        self.core.enable_usb_irq(UsbIrq::RESET_BABBLE | UsbIrq::SUSPEND | UsbIrq::DISCONNECT);
        self.configure_cep();
        self.state = DeviceState::Powered;
        debug!("USBD: initialized, {}", self.config.speed.to_str());
    }

    pub fn soft_connect(&mut self) {
        debug!("USBD: pull-up on");
        self.core.set_soft_connect(true);
    }

    pub fn soft_disconnect(&mut self) {
        debug!("USBD: pull-up off");
        self.core.set_soft_connect(false);
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut C {
        &mut self.core
    }

    pub fn class_driver(&self) -> &K {
        &self.class
    }

    pub fn class_driver_mut(&mut self) -> &mut K {
        &mut self.class
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn speed(&self) -> UsbSpeed {
        self.speed
    }

    pub fn active_configuration(&self) -> u8 {
        self.active_config
    }

    pub fn active_interface(&self) -> u8 {
        self.active_interface
    }

    pub fn remote_wakeup_enabled(&self) -> bool {
        self.remote_wakeup
    }

    pub fn cep_state(&self) -> CepState {
        self.cep_state
    }

    pub fn tx_endpoint(&self, ep: u8) -> Option<&Endpoint> {
        self.tx.get(ep as usize)
    }

    pub fn rx_endpoint(&self, ep: u8) -> Option<&Endpoint> {
        self.rx.get(ep as usize)
    }

    /// Drives one of the USB 2.0 electrical test modes directly.
    pub fn test_mode(&mut self, mode: TestMode) {
        debug!("USBD: test mode {:?}", mode);
        self.core.set_test_mode(mode);
    }

    fn configure_cep(&mut self) {
        let max_packet = self.config.control_max_packet;
        self.cep = Endpoint::control(max_packet, max_packet);
        self.cep_state = CepState::Idle;
        self.cep_source = CepSource::None;
        self.core.cep_clear(CepCsr::all());
        self.core.enable_ep_irq(0, PipeDir::Tx);
    }

    /// Interrupt entry point for the core's main interrupt line.
    pub fn interrupt(&mut self) {
        let irq = IrqSnapshot::read(&mut self.core);

        if irq.usb.contains(UsbIrq::DISCONNECT) {
            self.disconnect();
        }

        if !self.core.is_host_mode() {
            self.bus_events(irq.usb);
        }

        if irq.control_endpoint() {
            self.cep_interrupt();
        }

        for ep in irq.tx_endpoints() {
            self.core.disable_ep_irq(ep, PipeDir::Tx);
            let status = classify_device_tx(&mut self.core, ep);
            self.tx_interrupt(ep, status);
            self.core.enable_ep_irq(ep, PipeDir::Tx);
        }

        for ep in irq.rx_endpoints() {
            self.core.disable_ep_irq(ep, PipeDir::Rx);
            let status = classify_device_rx(&mut self.core, ep);
            self.rx_interrupt(ep, status);
            self.core.enable_ep_irq(ep, PipeDir::Rx);
        }
    }

    fn bus_events(&mut self, usb: UsbIrq) {
        if usb.contains(UsbIrq::RESUME) {
            debug!("USBD: resume");
            self.state = self.state_at_suspend;
        }
        if usb.contains(UsbIrq::SUSPEND) {
            debug!("USBD: suspend");
            self.core.enable_usb_irq(UsbIrq::RESUME);
            self.state_at_suspend = self.state;
            self.state = DeviceState::Suspended;
        }
        if usb.contains(UsbIrq::RESET_BABBLE) {
            self.core.enable_usb_irq(UsbIrq::DISCONNECT | UsbIrq::SUSPEND);
            self.core.cep_set(CepCsr::SERVICED_SETUP_END);
            self.core.cep_clear(CepCsr::STALL);
            self.bus_reset();
        }
        if usb.contains(UsbIrq::SOF) {
            let frame = self.core.frame_number();
            self.class.sof(frame);
        }
    }

    fn bus_reset(&mut self) {
        self.address = 0;
        self.active_config = 0;
        self.active_interface = 0;
        self.remote_wakeup = false;
        self.pending = Pending::None;
        self.state = DeviceState::Default;
        self.speed = if self.core.is_hs_mode() {
            UsbSpeed::High
        } else {
            UsbSpeed::Full
        };
        self.release_endpoints();
        self.configure_cep();
        info!("USBD: bus reset, {}", self.speed.to_str());
    }

    /// Stops all DMA and drops every data endpoint back to unconfigured.
    fn release_endpoints(&mut self) {
        self.dma.release_all(&mut self.core);
        for n in 1..MAX_ENDPOINTS {
            if self.tx[n].is_configured() {
                self.core.disable_ep_irq(n as u8, PipeDir::Tx);
            }
            if self.rx[n].is_configured() {
                self.core.disable_ep_irq(n as u8, PipeDir::Rx);
            }
            self.tx[n] = Endpoint::default();
            self.rx[n] = Endpoint::default();
        }
    }

    fn disconnect(&mut self) {
        info!("USBD: disconnected");
        self.state = DeviceState::NotAttached;
        for ep in 0..MAX_ENDPOINTS as u8 {
            self.core.disable_ep_irq(ep, PipeDir::Tx);
            self.core.disable_ep_irq(ep, PipeDir::Rx);
        }
        self.release_endpoints();
        self.cep_state = CepState::Idle;
        self.class.release(RELEASE_ON_DISCONNECT);
        trace!("USBD: endpoint interrupts masked");
    }
}
