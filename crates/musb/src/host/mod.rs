//! Host role: root-port state machine, control pipe, enumeration and data
//! pipes for the single directly attached device.
//!
//! [`HostController::interrupt`] and [`HostController::dma_interrupt`] run in
//! interrupt context. [`HostController::task`] is polled by the application
//! and advances everything that has to wait for bus events or millisecond
//! delays.

use log::{debug, info, warn};

use crate::config::HostConfig;
use crate::descriptors::{
    UsbConfigurationDescriptor, UsbDeviceDescriptor, UsbInterfaceDescriptor,
    CONFIGURATION_DESCRIPTOR_LEN, DEVICE_DESCRIPTOR_LEN,
};
use crate::dma::DmaCoordinator;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::event::EventCell;
use crate::irq::{classify_host_rx, classify_host_tx, IrqSnapshot};
use crate::regs::{UsbCore, UsbIrq};
use crate::timer::elapsed;
use crate::types::{DeviceState, EpStatus, PipeDir, Role, TestMode, UsbSpeed, VbusLevel};
use crate::MAX_ENDPOINTS;

mod control;
mod enumeration;
mod pipe;

pub use control::{CepState, ControlResult};
pub use enumeration::{
    check_class_support, validate_config_descriptor, validate_device_descriptor, EnumError,
    EnumState, PET_PRODUCT_ID, PET_VENDOR_ID,
};
pub use pipe::encode_interval;

use control::ControlPipe;
use enumeration::Enumerator;

/// Bytes of the configuration descriptor read during enumeration: the
/// configuration descriptor followed by the first interface descriptor.
pub const CAPTURED_CONFIG_LEN: usize = CONFIGURATION_DESCRIPTOR_LEN + 9;

/// A class driver bound to the attached device by enumeration.
///
/// `class_id` is matched against the first interface descriptor as
/// `bInterfaceClass << 16 | bInterfaceSubClass << 8 | bInterfaceProtocol`.
pub trait HostClassDriver {
    fn class_id(&self) -> u32;

    /// The device at `addr` was matched to this driver.
    fn allocate(&mut self, _addr: u8) {}

    /// The device at `addr` went away.
    fn release(&mut self, _addr: u8) {}

    /// A control transfer started with
    /// [`HostController::start_control_transfer`] finished.
    fn cep_done(&mut self, _addr: u8, _result: ControlResult, _count: u32) {}

    fn tx_done(&mut self, _addr: u8, _pipe: u8, _status: EpStatus, _count: u32) {}

    fn rx_done(&mut self, _addr: u8, _pipe: u8, _status: EpStatus, _count: u32) {}

    fn sof(&mut self, _frame: u16) {}
}

/// Application notifications about the root port.
pub trait HostEvents {
    /// Connect interrupt, with the speed seen on the line.
    fn connected(&mut self, _speed: UsbSpeed, _vbus: VbusLevel) {}

    /// The device finished its bus reset and runs at `speed`.
    fn attached(&mut self, _speed: UsbSpeed) {}

    fn detached(&mut self) {}

    fn vbus_error(&mut self, _level: VbusLevel) {}

    fn babble(&mut self) {}

    fn session_request(&mut self) {}

    fn enumerated(&mut self, _device: &UsbDeviceDescriptor) {}

    fn class_driver_assigned(&mut self) {}

    fn not_supported(&mut self, _error: EnumError) {}
}

impl HostEvents for () {}

/// Root-port state machine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    #[default]
    Idle,
    /// Connection seen; waiting out the power debounce.
    DeviceDetected,
    Resetting,
    Enumerating,
    AllocateClassDriver,
    Servicing,
    Error,
}

/// What the host knows about the attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDevice {
    pub addr: u8,
    pub speed: UsbSpeed,
    pub state: DeviceState,
    pub max_pkt0: u8,
    pub class_assigned: bool,
    pub error: Option<EnumError>,
}

impl Default for TargetDevice {
    fn default() -> Self {
        Self {
            addr: 0,
            speed: UsbSpeed::High,
            state: DeviceState::NotAttached,
            max_pkt0: 64,
            class_assigned: false,
            error: None,
        }
    }
}

/// Descriptor bytes captured during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedDescriptors {
    pub device: [u8; DEVICE_DESCRIPTOR_LEN],
    pub config: [u8; CAPTURED_CONFIG_LEN],
}

impl Default for CapturedDescriptors {
    fn default() -> Self {
        Self {
            device: [0; DEVICE_DESCRIPTOR_LEN],
            config: [0; CAPTURED_CONFIG_LEN],
        }
    }
}

impl CapturedDescriptors {
    pub fn device_descriptor(&self) -> UsbDeviceDescriptor {
        UsbDeviceDescriptor::parse(&self.device)
    }

    pub fn configuration_descriptor(&self) -> UsbConfigurationDescriptor {
        UsbConfigurationDescriptor::parse(&self.config)
    }

    pub fn interface_descriptor(&self) -> UsbInterfaceDescriptor {
        UsbInterfaceDescriptor::parse(&self.config[CONFIGURATION_DESCRIPTOR_LEN..])
    }
}

pub struct HostController<C: UsbCore, U: HostEvents, K: HostClassDriver> {
    core: C,
    config: HostConfig,
    events: U,
    class: Option<K>,

    state: HostState,
    /// Timestamp of the last root-port transition that starts a wait.
    since: u32,
    reset_released: bool,
    resume_started: Option<u32>,

    device: TargetDevice,
    descriptors: CapturedDescriptors,
    control: ControlPipe,
    enumeration: Enumerator,

    tx: [Endpoint; MAX_ENDPOINTS],
    rx: [Endpoint; MAX_ENDPOINTS],
    dma: DmaCoordinator,

    cep_event: EventCell<ControlResult>,
    connect_event: EventCell<UsbSpeed>,
    disconnect_event: EventCell<()>,
}

impl<C: UsbCore, U: HostEvents, K: HostClassDriver> HostController<C, U, K> {
    pub fn new(core: C, config: HostConfig, events: U) -> Self {
        Self {
            core,
            config,
            events,
            class: None,
            state: HostState::Idle,
            since: 0,
            reset_released: false,
            resume_started: None,
            device: TargetDevice::default(),
            descriptors: CapturedDescriptors::default(),
            control: ControlPipe::new(config.control_fifo_size),
            enumeration: Enumerator::default(),
            tx: [Endpoint::default(); MAX_ENDPOINTS],
            rx: [Endpoint::default(); MAX_ENDPOINTS],
            dma: DmaCoordinator::new(),
            cep_event: EventCell::new(),
            connect_event: EventCell::new(),
            disconnect_event: EventCell::new(),
        }
    }

    /// Brings the core up in host mode: high speed negotiation enabled, all
    /// endpoint interrupts masked, connect/disconnect armed, session started
    /// and the control pipe aimed at the default address.
    pub fn init(&mut self) {
        self.core.enable_hs(true);
        let _ = self.core.read_usb_irq();
        for ep in 1..MAX_ENDPOINTS as u8 {
            self.core.disable_ep_irq(ep, PipeDir::Tx);
            self.core.disable_ep_irq(ep, PipeDir::Rx);
        }
        self.core.enable_usb_irq(UsbIrq::CONNECT | UsbIrq::DISCONNECT);
        self.core.set_session(true);
        self.configure_control_pipe(0);
        debug!("USBH: initialized");
    }

    /// Installs the class driver matched during enumeration. Only one is
    /// supported; registering again replaces it.
    pub fn register_class_driver(&mut self, class: K) {
        self.device.class_assigned = false;
        self.class = Some(class);
    }

    pub fn class_driver(&self) -> Option<&K> {
        self.class.as_ref()
    }

    pub fn class_driver_mut(&mut self) -> Option<&mut K> {
        self.class.as_mut()
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut C {
        &mut self.core
    }

    pub fn events(&self) -> &U {
        &self.events
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn device(&self) -> &TargetDevice {
        &self.device
    }

    pub fn device_state(&self) -> DeviceState {
        self.device.state
    }

    pub fn device_speed(&self) -> UsbSpeed {
        self.device.speed
    }

    pub fn descriptors(&self) -> &CapturedDescriptors {
        &self.descriptors
    }

    pub fn enumeration_state(&self) -> EnumState {
        self.enumeration.state
    }

    pub fn tx_pipe(&self, pipe: u8) -> Option<&Endpoint> {
        self.tx.get(pipe as usize)
    }

    pub fn rx_pipe(&self, pipe: u8) -> Option<&Endpoint> {
        self.rx.get(pipe as usize)
    }

    /// Polling entry point: control pipe first, then enumeration, then the
    /// root-port state machine.
    pub fn task(&mut self) {
        self.control_task();
        self.enumeration_task();
        self.port_task();
        self.resume_task();
    }

    fn port_task(&mut self) {
        if self.take_bus_event(|host| &host.disconnect_event).is_some() {
            self.handle_disconnect();
            self.set_state(HostState::Idle);
        }

        let now = self.core.millis();
        match self.state {
            HostState::Idle => {
                // keep sampling ID so that a connection is noticed
                self.core.set_session(true);
                if let Some(speed) = self.take_bus_event(|host| &host.connect_event) {
                    self.device.state = DeviceState::Attached;
                    self.device.speed = speed;
                    self.since = now;
                    self.set_state(HostState::DeviceDetected);
                }
            }
            HostState::DeviceDetected => {
                if elapsed(self.since, now) >= self.config.connect_debounce_ms {
                    self.core.enable_usb_irq(UsbIrq::VBUS_ERROR);
                    self.device.state = DeviceState::Powered;
                    self.since = now;
                    self.reset_released = false;
                    self.core.set_bus_reset(true);
                    self.set_state(HostState::Resetting);
                }
            }
            HostState::Resetting => {
                let t = elapsed(self.since, now);
                if !self.reset_released && t >= self.config.reset_assert_ms {
                    self.core.set_bus_reset(false);
                    self.reset_released = true;
                }
                if self.reset_released
                    && t >= self.config.reset_assert_ms + self.config.reset_settle_ms
                {
                    if self.device.speed == UsbSpeed::Full && self.core.is_hs_mode() {
                        self.device.speed = UsbSpeed::High;
                    }
                    info!("USBH: device attached at {}", self.device.speed.to_str());
                    self.events.attached(self.device.speed);
                    self.configure_control_pipe(0);
                    self.device.state = DeviceState::Default;
                    self.set_state(HostState::Enumerating);
                }
            }
            HostState::Enumerating => match self.enumeration.state {
                EnumState::Idle => self.enumeration.start(),
                EnumState::Success => {
                    self.device.state = DeviceState::Address;
                    self.enumeration.reset();
                    self.set_state(HostState::AllocateClassDriver);
                }
                EnumState::Error(err) => {
                    self.enumeration.reset();
                    self.device.state = DeviceState::Attached;
                    self.device.error = Some(err);
                    self.set_state(HostState::Error);
                }
                _ => {}
            },
            HostState::AllocateClassDriver => {
                let addr = self.device.addr;
                if let Some(class) = self.class.as_mut() {
                    class.allocate(addr);
                }
                self.set_state(HostState::Servicing);
                self.events.class_driver_assigned();
                let desc = self.descriptors.device_descriptor();
                info!(
                    "USBH: device {:04x}:{:04x} enumerated at address {:#x}",
                    desc.vendor_id(),
                    desc.product_id(),
                    addr
                );
                self.events.enumerated(&desc);
            }
            HostState::Servicing => {}
            HostState::Error => {
                if let Some(err) = self.device.error {
                    warn!("USBH: device not supported: {:?} ({})", err, err.code());
                    self.events.not_supported(err);
                }
                self.set_state(HostState::Idle);
            }
        }
    }

    fn take_bus_event<T: Copy>(&mut self, cell: fn(&Self) -> &EventCell<T>) -> Option<T> {
        self.core.disable_usb_irq(UsbIrq::CONNECT | UsbIrq::DISCONNECT);
        // Safety: the bus interrupt that posts connect/disconnect is masked.
        let event = unsafe { cell(self).take() };
        self.core.enable_usb_irq(UsbIrq::CONNECT | UsbIrq::DISCONNECT);
        event
    }

    fn set_state(&mut self, state: HostState) {
        if self.state != state {
            debug!("USBH: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Stops all DMA and returns every data pipe to unconfigured; the next
    /// device gets its pipes configured from scratch.
    fn release_pipes(&mut self) {
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

    fn handle_disconnect(&mut self) {
        info!("USBH: device detached");
        self.events.detached();

        if self.device.class_assigned {
            let addr = self.device.addr;
            if let Some(class) = self.class.as_mut() {
                class.release(addr);
            }
        }

        self.device = TargetDevice::default();
        self.descriptors = CapturedDescriptors::default();
        self.enumeration.reset();
        self.resume_started = None;

        self.release_pipes();
        self.core.enable_usb_irq(UsbIrq::CONNECT | UsbIrq::DISCONNECT);
        self.configure_control_pipe(0);
    }

    /// Interrupt entry point for the core's main interrupt line.
    pub fn interrupt(&mut self) {
        let irq = IrqSnapshot::read(&mut self.core);

        // The role can change while the disconnect is handled, so this is
        // checked before looking at the host-mode events.
        if irq.usb.contains(UsbIrq::DISCONNECT) && self.core.role() == Role::ADevice {
            if self.core.is_session_on() {
                self.core.set_session(false);
            }
            // Safety: the task side masks this interrupt while taking.
            unsafe { self.disconnect_event.post(()) };
        }

        if self.core.is_host_mode() {
            self.bus_events(irq.usb);
        }

        if irq.control_endpoint() {
            let result = control::classify_cep(&mut self.core);
            // Safety: the task side masks the control endpoint interrupt
            // while taking.
            unsafe { self.cep_event.post(result) };
        }

        for ep in irq.tx_endpoints() {
            self.core.disable_ep_irq(ep, PipeDir::Tx);
            let status = classify_host_tx(&mut self.core, ep);
            self.tx_interrupt(ep, status);
            self.core.enable_ep_irq(ep, PipeDir::Tx);
        }

        for ep in irq.rx_endpoints() {
            self.core.disable_ep_irq(ep, PipeDir::Rx);
            let status = classify_host_rx(&mut self.core, ep);
            self.rx_interrupt(ep, status);
            self.core.enable_ep_irq(ep, PipeDir::Rx);
        }
    }

    fn bus_events(&mut self, usb: UsbIrq) {
        if self.core.role() == Role::ADevice {
            if usb.contains(UsbIrq::SESSION_REQUEST) {
                debug!("USBH: session request");
                self.events.session_request();
            }
            if usb.contains(UsbIrq::VBUS_ERROR) {
                let level = self.core.vbus_level();
                warn!("USBH: VBUS error, level {:?}", level);
                self.events.vbus_error(level);
            }
        }

        if usb.contains(UsbIrq::CONNECT) {
            let speed = self.core.line_speed();
            if self.core.is_suspended() {
                self.core.set_suspend_mode(false);
            }
            let vbus = self.core.vbus_level();
            self.events.connected(speed, vbus);
            // Safety: the task side masks this interrupt while taking.
            unsafe { self.connect_event.post(speed) };
        }

        if usb.contains(UsbIrq::RESET_BABBLE) {
            warn!("USBH: babble");
            self.events.babble();
        }

        if usb.contains(UsbIrq::SOF) {
            let frame = self.core.frame_number();
            if let Some(class) = self.class.as_mut() {
                class.sof(frame);
            }
        }
    }

    /// Puts the bus into suspend. Remote wakeup is not enabled.
    pub fn suspend(&mut self) {
        debug!("USBH: suspend");
        self.core.set_suspend_mode(true);
        if self.device.state != DeviceState::NotAttached {
            self.device.state = DeviceState::Suspended;
        }
    }

    /// Starts resume signalling; `task` ends it after
    /// [`HostConfig::resume_ms`].
    pub fn resume(&mut self) {
        debug!("USBH: resume");
        self.core.set_suspend_mode(false);
        self.core.set_resume(true);
        self.resume_started = Some(self.core.millis());
    }

    pub fn is_resuming(&self) -> bool {
        self.resume_started.is_some()
    }

    fn resume_task(&mut self) {
        let Some(start) = self.resume_started else {
            return;
        };
        if elapsed(start, self.core.millis()) > self.config.resume_ms {
            self.core.set_resume(false);
            self.resume_started = None;
            if self.device.state == DeviceState::Suspended {
                self.device.state = if self.device.class_assigned {
                    DeviceState::Address
                } else {
                    DeviceState::Default
                };
            }
        }
    }

    /// Drives one of the USB 2.0 electrical test modes.
    pub fn test_mode(&mut self, mode: TestMode) {
        debug!("USBH: test mode {:?}", mode);
        self.core.set_test_mode(mode);
    }

    /// Starts a test mode from its SET_FEATURE selector value.
    pub fn test_mode_selector(&mut self, selector: u8) -> Result<()> {
        let mode = TestMode::from_selector(selector).ok_or(Error::InvalidState)?;
        self.test_mode(mode);
        Ok(())
    }
}
