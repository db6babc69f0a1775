//! Host side of endpoint 0.
//!
//! The interrupt handler only classifies the control endpoint interrupt and
//! posts the outcome; the SETUP/DATA/STATUS sequencing below runs from
//! `task`. One control transfer is outstanding at a time, shared between
//! enumeration (internal requests) and the class driver.

use log::{debug, trace, warn};

use super::{HostClassDriver, HostController, HostEvents};
use crate::buffer::Buffer;
use crate::descriptors::DescriptorType;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::regs::{CepCsr, HostTarget, UsbCore};
use crate::request::{construct_get_descriptor_command, Recipient, RequestKind, SetupPacket};
use crate::types::{DeviceState, PipeDir, TransferType, UsbDirection};

use super::pipe::encode_interval;

/// Outcome of a host control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResult {
    Success,
    NakTimeout,
    /// Three attempts without a handshake.
    NoResponse,
    StallReceived,
}

impl ControlResult {
    pub fn is_success(self) -> bool {
        self == ControlResult::Success
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CepState {
    #[default]
    Idle,
    Setup,
    /// OUT data stage.
    Tx,
    /// IN data stage.
    Rx,
    /// OUT status handshake after IN data.
    StatusAfterIn,
    /// IN status handshake after OUT data or a zero-data request.
    StatusAfterOut,
}

/// Where the data stage of the current control transfer lands.
#[derive(Debug, Default, Clone, Copy)]
pub(super) enum CepData {
    #[default]
    None,
    DeviceDescriptor,
    ConfigDescriptor,
    Caller(Buffer),
}

pub(super) struct ControlPipe {
    pub ep: Endpoint,
    pub state: CepState,
    pub dir: UsbDirection,
    pub data: CepData,
    /// Set while enumeration (or another controller-issued request) owns the
    /// pipe; the result then goes to `result` instead of the class driver.
    pub internal: bool,
    pub result: Option<ControlResult>,
}

impl ControlPipe {
    pub fn new(fifo_size: u16) -> Self {
        Self {
            ep: Endpoint::control(64, fifo_size),
            state: CepState::Idle,
            dir: UsbDirection::Out,
            data: CepData::None,
            internal: false,
            result: None,
        }
    }
}

/// Reads and clears the latched control endpoint errors. A stall outranks a
/// missing handshake, which outranks a NAK timeout.
pub(super) fn classify_cep<C: UsbCore>(core: &mut C) -> ControlResult {
    let csr = core.cep_csr();
    let mut result = ControlResult::Success;

    if csr.contains(CepCsr::NAK_TIMEOUT) {
        core.cep_clear(CepCsr::NAK_TIMEOUT);
        result = ControlResult::NakTimeout;
    }
    if csr.contains(CepCsr::ERROR) {
        core.cep_clear(CepCsr::ERROR);
        result = ControlResult::NoResponse;
    }
    if csr.contains(CepCsr::STALL) {
        core.cep_clear(CepCsr::STALL);
        result = ControlResult::StallReceived;
    }
    result
}

impl<C: UsbCore, U: HostEvents, K: HostClassDriver> HostController<C, U, K> {
    /// Points the control pipe at `target_addr` with the current max packet
    /// size, speed and NAK limit.
    pub(super) fn configure_control_pipe(&mut self, target_addr: u8) {
        let mut ep = Endpoint::control(self.device.max_pkt0 as u16, self.config.control_fifo_size);
        ep.target_addr = target_addr;
        ep.interval = self.config.control_nak_interval;
        self.control.ep = ep;
        self.control.state = CepState::Idle;

        self.core.cep_clear(CepCsr::all());

        let limit = match encode_interval(TransferType::Control, self.device.speed, ep.interval) {
            Ok(limit) => limit,
            Err(err) => {
                warn!("USBH: control NAK limit: {}", err);
                16
            }
        };
        self.core.set_cep_nak_limit(limit);
        self.core.set_host_target(
            0,
            PipeDir::Tx,
            HostTarget {
                func_addr: target_addr,
                ep_num: 0,
                protocol: TransferType::Control.protocol_bits(),
                speed: self.device.speed,
                interval: 0,
            },
        );
        self.core.enable_ep_irq(0, PipeDir::Tx);
        trace!(
            "USBH: control pipe -> addr {:#x}, maxpkt {}, nak limit {}",
            target_addr,
            ep.max_pkt_size,
            limit
        );
    }

    /// Starts a control transfer on behalf of the class driver. Completion is
    /// reported through [`HostClassDriver::cep_done`].
    ///
    /// `data` must cover `setup.length` bytes and be writable for IN
    /// requests.
    pub fn start_control_transfer(
        &mut self,
        setup: SetupPacket,
        data: Option<Buffer>,
    ) -> Result<()> {
        if self.device.state == DeviceState::NotAttached {
            return Err(Error::NotAttached);
        }
        if !self.control_pipe_idle() {
            return Err(Error::PipeBusy);
        }

        let data = match data {
            _ if setup.length == 0 => CepData::None,
            None => return Err(Error::BufferTooSmall),
            Some(buf) => {
                if buf.len() < setup.length as usize {
                    return Err(Error::BufferTooSmall);
                }
                if setup.direction() == UsbDirection::In {
                    buf.check_writable()?;
                }
                CepData::Caller(buf)
            }
        };

        self.start_request(setup, data, false);
        Ok(())
    }

    pub(super) fn start_request(&mut self, setup: SetupPacket, data: CepData, internal: bool) {
        let pipe = &mut self.control;
        pipe.ep.begin(None, setup.length as u32);
        pipe.dir = setup.direction();
        pipe.data = data;
        pipe.internal = internal;
        pipe.result = None;
        pipe.state = CepState::Setup;

        trace!(
            "USBH: SETUP {:02x} {:02x} value {:#06x} index {:#06x} length {}",
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            setup.length
        );
        self.core.write_fifo(0, &setup.to_bytes());
        self.core.cep_set(CepCsr::SETUP_PKT | CepCsr::TX_PKT_RDY);
    }

    pub(super) fn request_descriptor(
        &mut self,
        desc_type: DescriptorType,
        length: u16,
        data: CepData,
    ) {
        let setup = construct_get_descriptor_command(
            RequestKind::Standard,
            Recipient::Device,
            desc_type,
            0,
            length,
        );
        self.start_request(setup, data, true);
    }

    /// Re-reads the first 8 bytes of the device descriptor into the captured
    /// descriptor. The outcome is available from
    /// [`HostController::take_control_result`].
    pub fn read_device_descriptor(&mut self) -> Result<()> {
        if self.device.addr == 0 {
            return Err(Error::NotAttached);
        }
        if !self.control_pipe_idle() {
            return Err(Error::PipeBusy);
        }
        self.configure_control_pipe(self.device.addr);
        self.request_descriptor(DescriptorType::Device, 8, CepData::DeviceDescriptor);
        Ok(())
    }

    /// Builds a standard GET_DESCRIPTOR request.
    pub fn construct_get_descriptor_command(
        &self,
        desc_type: DescriptorType,
        index: u8,
        length: u16,
    ) -> SetupPacket {
        construct_get_descriptor_command(
            RequestKind::Standard,
            Recipient::Device,
            desc_type,
            index,
            length,
        )
    }

    pub fn control_pipe_idle(&self) -> bool {
        self.control.state == CepState::Idle
    }

    pub fn control_state(&self) -> CepState {
        self.control.state
    }

    /// Bytes moved by the data stage of the current or last control
    /// transfer.
    pub fn control_count(&self) -> u32 {
        self.control.ep.xfr_count
    }

    pub fn control_result(&self) -> Option<ControlResult> {
        self.control.result
    }

    pub fn take_control_result(&mut self) -> Option<ControlResult> {
        if self.control.state == CepState::Idle {
            self.control.result.take()
        } else {
            None
        }
    }

    /// Abandons the current control transfer: flushes the FIFO and clears the
    /// sticky error and request bits, keeping the data toggle write enable
    /// and ping settings.
    pub fn abort_control_transfer(&mut self) {
        debug!("USBH: control transfer aborted in {:?}", self.control.state);
        self.core.disable_ep_irq(0, PipeDir::Tx);
        self.core.cep_set(CepCsr::FLUSH_FIFO);
        self.cep_event.clear();
        self.core.enable_ep_irq(0, PipeDir::Tx);

        self.core.cep_clear(
            CepCsr::NAK_TIMEOUT
                | CepCsr::STALL
                | CepCsr::RX_PKT_RDY
                | CepCsr::REQ_PKT
                | CepCsr::SETUP_PKT
                | CepCsr::STATUS_PKT
                | CepCsr::ERROR,
        );

        self.control.state = CepState::Idle;
        self.control.internal = false;
        self.control.data = CepData::None;
    }

    pub(super) fn control_task(&mut self) {
        self.core.disable_ep_irq(0, PipeDir::Tx);
        // Safety: the control endpoint interrupt, the only producer, is
        // masked.
        let event = unsafe { self.cep_event.take() };
        self.core.enable_ep_irq(0, PipeDir::Tx);

        let Some(event) = event else {
            return;
        };

        if self.control.state == CepState::Idle {
            trace!("USBH: control event {:?} with no transfer", event);
            return;
        }

        if !event.is_success() {
            debug!("USBH: control transfer ended in {:?}: {:?}", self.control.state, event);
            self.finish_control(event);
            return;
        }

        match self.control.state {
            CepState::Idle => {}
            CepState::Setup => {
                if self.control.ep.xfr_length == 0 {
                    self.status_in();
                } else {
                    self.next_control_txn();
                    match self.control.dir {
                        UsbDirection::In => {
                            self.control.state = CepState::Rx;
                            self.core.cep_set(CepCsr::REQ_PKT);
                        }
                        UsbDirection::Out => {
                            self.control.state = CepState::Tx;
                            self.write_control_packet();
                        }
                    }
                }
            }
            CepState::Rx => {
                let received = self.read_control_packet();
                let ep = &self.control.ep;
                if ep.xfr_count == ep.xfr_length || received < ep.max_pkt_size as u32 {
                    self.control.state = CepState::StatusAfterIn;
                    self.core.cep_set(CepCsr::STATUS_PKT | CepCsr::TX_PKT_RDY);
                } else {
                    self.next_control_txn();
                    self.core.cep_set(CepCsr::REQ_PKT);
                }
            }
            CepState::Tx => {
                let ep = &self.control.ep;
                if ep.xfr_count == ep.xfr_length {
                    self.status_in();
                } else {
                    self.next_control_txn();
                    self.write_control_packet();
                }
            }
            CepState::StatusAfterIn => self.finish_control(ControlResult::Success),
            CepState::StatusAfterOut => {
                self.core.cep_clear(CepCsr::STATUS_PKT | CepCsr::RX_PKT_RDY);
                self.finish_control(ControlResult::Success);
            }
        }
    }

    fn status_in(&mut self) {
        self.control.state = CepState::StatusAfterOut;
        self.core.cep_set(CepCsr::STATUS_PKT | CepCsr::REQ_PKT);
    }

    fn next_control_txn(&mut self) {
        let ep = &mut self.control.ep;
        ep.txn_length = ep.remaining().min(ep.max_pkt_size as u32);
        ep.txn_count = 0;
    }

    fn write_control_packet(&mut self) {
        let ep = &mut self.control.ep;
        let len = ep.txn_length;
        if let CepData::Caller(buf) = self.control.data {
            // Safety: the caller keeps the buffer alive until `cep_done`.
            let bytes = unsafe { buf.slice(ep.xfr_count as usize, len as usize) };
            self.core.write_fifo(0, bytes);
        }
        ep.advance(len);
        self.core.cep_set(CepCsr::TX_PKT_RDY);
    }

    /// Copies the received IN packet to the transfer's destination. Returns
    /// the size of the packet on the bus.
    fn read_control_packet(&mut self) -> u32 {
        let received = self.core.cep_rx_count() as u32;
        let ep = &mut self.control.ep;
        let room = ep.remaining().min(received);
        let start = ep.xfr_count as usize;
        let end = start + room as usize;

        match self.control.data {
            CepData::None => {}
            CepData::DeviceDescriptor => {
                self.core.read_fifo(0, &mut self.descriptors.device[start..end]);
            }
            CepData::ConfigDescriptor => {
                self.core.read_fifo(0, &mut self.descriptors.config[start..end]);
            }
            CepData::Caller(buf) => {
                // Safety: as in `write_control_packet`; writability was
                // checked when the transfer was started.
                let dst = unsafe { buf.slice_mut(start, room as usize) };
                self.core.read_fifo(0, dst);
            }
        }

        if room < received {
            warn!("USBH: control IN packet of {} bytes, {} expected", received, room);
            self.core.cep_set(CepCsr::FLUSH_FIFO);
        }
        ep.txn_length = room;
        ep.advance(room);
        self.core.cep_clear(CepCsr::RX_PKT_RDY);
        received
    }

    fn finish_control(&mut self, result: ControlResult) {
        let count = self.control.ep.xfr_count;
        self.control.state = CepState::Idle;
        self.control.data = CepData::None;
        self.control.result = Some(result);

        if self.control.internal {
            self.control.internal = false;
            return;
        }
        if self.device.class_assigned {
            let addr = self.device.addr;
            if let Some(class) = self.class.as_mut() {
                class.cep_done(addr, result, count);
            }
        }
    }
}
