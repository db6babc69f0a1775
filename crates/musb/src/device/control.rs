//! Device side of endpoint 0 and the standard requests of USB 2.0 9.4.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};

use super::{DeviceClassDriver, DeviceController, Response};
use crate::buffer::Buffer;
use crate::descriptors::DescriptorType;
use crate::regs::{CepCsr, UsbCore};
use crate::request::{
    Recipient, RequestKind, SetupPacket, StdRequest, FEATURE_ENDPOINT_HALT,
    FEATURE_REMOTE_WAKEUP, FEATURE_TEST_MODE, SETUP_PKT_LEN,
};
use crate::types::{DeviceState, EpStatus, PipeDir, TestMode, UsbDirection, UsbSpeed};
use crate::MAX_ENDPOINTS;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CepState {
    /// Waiting for the next SETUP packet.
    #[default]
    Idle,
    Setup,
    /// IN data stage.
    Tx,
    /// OUT data stage.
    Rx,
}

/// Source or destination of the current data stage.
#[derive(Debug, Default, Clone, Copy)]
pub(super) enum CepSource {
    #[default]
    None,
    Scratch,
    Caller(Buffer),
}

/// Work deferred until the status stage of a zero-length request went out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) enum Pending {
    #[default]
    None,
    SetAddress(u8),
    TestMode(TestMode),
}

enum Stage {
    Stall,
    Ack,
    Send(CepSource, u32),
    Receive(Buffer, u32),
}

impl<C: UsbCore, K: DeviceClassDriver> DeviceController<C, K> {
    pub(super) fn cep_interrupt(&mut self) {
        let csr = self.core.cep_csr();

        if csr.contains(CepCsr::STALL) {
            self.core.cep_clear(CepCsr::STALL);
            self.cep_abort(EpStatus::SENT_STALL);
            return;
        }

        if csr.contains(CepCsr::SETUP_END) {
            self.core.cep_set(CepCsr::SERVICED_SETUP_END);
            self.cep_abort(EpStatus::SETUP_END);
            // the host already sent the next SETUP
            if csr.contains(CepCsr::RX_PKT_RDY) {
                self.setup_received();
            }
            return;
        }

        match self.cep_state {
            CepState::Idle | CepState::Setup => {
                if csr.contains(CepCsr::RX_PKT_RDY) {
                    self.setup_received();
                }
            }
            CepState::Tx => self.cep_tx_complete(),
            CepState::Rx => {
                if csr.contains(CepCsr::RX_PKT_RDY) {
                    self.cep_rx();
                }
            }
        }
    }

    /// Drops the current control transfer after a sent stall or an early
    /// SETUP. The class driver hears about an interrupted data stage.
    fn cep_abort(&mut self, status: EpStatus) {
        debug!("USBD: control transfer ended in {:?}: {:?}", self.cep_state, status);
        match self.cep_state {
            CepState::Tx => self.class.cep_tx_done(status),
            CepState::Rx => self.class.cep_rx_done(status),
            CepState::Idle | CepState::Setup => {}
        }
        self.cep_idle();
    }

    fn cep_idle(&mut self) {
        self.cep_state = CepState::Idle;
        self.cep_source = CepSource::None;
        self.cep_zlp = false;
        self.cep.reset_progress();
    }

    fn cep_stall(&mut self) {
        warn!(
            "USBD: stall request {:02x} {:02x} value {:#06x} index {:#06x}",
            self.setup.request_type, self.setup.request, self.setup.value, self.setup.index
        );
        self.pending = Pending::None;
        self.core.cep_set(CepCsr::SEND_STALL | CepCsr::SERVICED_RX_PKT_RDY);
        self.cep_idle();
    }

    fn setup_received(&mut self) {
        let count = self.core.cep_rx_count() as usize;
        if count != SETUP_PKT_LEN {
            warn!("USBD: {} byte SETUP packet", count);
            self.core.cep_set(CepCsr::FLUSH_FIFO);
            self.cep_stall();
            return;
        }

        let mut raw = [0u8; SETUP_PKT_LEN];
        self.core.read_fifo(0, &mut raw);
        let setup = SetupPacket::from_bytes(&raw);
        self.setup = setup;
        self.cep_state = CepState::Setup;
        trace!(
            "USBD: SETUP {:02x} {:02x} value {:#06x} index {:#06x} length {}",
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            setup.length
        );

        let stage = match setup.kind() {
            RequestKind::Standard => self.standard_request(&setup),
            RequestKind::Class | RequestKind::Vendor => self.class_request(&setup),
            RequestKind::Reserved => Stage::Stall,
        };

        match stage {
            Stage::Stall => self.cep_stall(),
            _ if setup.length == 0 => self.end_zero_data_request(),
            Stage::Ack => {
                warn!("USBD: no data for a {} byte request", setup.length);
                self.cep_stall();
            }
            Stage::Send(source, len) => {
                self.core.cep_set(CepCsr::SERVICED_RX_PKT_RDY);
                let len = len.min(setup.length as u32);
                self.cep.begin(None, len);
                self.cep_zlp = len != 0
                    && len < setup.length as u32
                    && len % self.cep.max_pkt_size as u32 == 0;
                self.cep_source = source;
                self.cep_state = CepState::Tx;
                self.next_cep_txn();
                self.write_cep_packet();
            }
            Stage::Receive(buf, len) => {
                self.core.cep_set(CepCsr::SERVICED_RX_PKT_RDY);
                self.cep.begin(None, len);
                self.cep_source = CepSource::Caller(buf);
                self.cep_state = CepState::Rx;
                self.next_cep_txn();
            }
        }
    }

    /// Acknowledges a request without data stage, then applies whatever had
    /// to wait for the status handshake.
    fn end_zero_data_request(&mut self) {
        self.core.cep_set(CepCsr::SERVICED_RX_PKT_RDY | CepCsr::DATA_END);
        self.cep_idle();

        match core::mem::take(&mut self.pending) {
            Pending::None => {}
            Pending::SetAddress(addr) => {
                self.core.delay_us(self.config.set_address_delay_us);
                self.core.set_function_address(addr);
                debug!("USBD: address {:#x}", addr);
            }
            Pending::TestMode(mode) => {
                self.core.delay_us(self.config.set_address_delay_us);
                self.test_mode(mode);
            }
        }
    }

    fn next_cep_txn(&mut self) {
        let ep = &mut self.cep;
        ep.txn_length = ep.remaining().min(ep.max_pkt_size as u32);
        ep.txn_count = 0;
    }

    fn write_cep_packet(&mut self) {
        let ep = &mut self.cep;
        let len = ep.txn_length as usize;
        let start = ep.xfr_count as usize;
        match self.cep_source {
            CepSource::None => {}
            CepSource::Scratch => self.core.write_fifo(0, &self.scratch[start..start + len]),
            CepSource::Caller(buf) => {
                // Safety: descriptor and class buffers stay valid until the
                // data stage completes.
                let bytes = unsafe { buf.slice(start, len) };
                self.core.write_fifo(0, bytes);
            }
        }
        ep.advance(len as u32);

        if ep.xfr_count < ep.xfr_length || self.cep_zlp {
            self.core.cep_set(CepCsr::TX_PKT_RDY);
        } else {
            self.core.cep_set(CepCsr::TX_PKT_RDY | CepCsr::DATA_END);
        }
    }

    fn cep_tx_complete(&mut self) {
        if self.cep.xfr_count < self.cep.xfr_length {
            self.next_cep_txn();
            self.write_cep_packet();
            return;
        }
        if self.cep_zlp {
            self.cep_zlp = false;
            self.next_cep_txn();
            self.write_cep_packet();
            return;
        }
        trace!("USBD: control IN done, {} bytes", self.cep.xfr_count);
        self.class.cep_tx_done(EpStatus::empty());
        self.cep_idle();
    }

    fn cep_rx(&mut self) {
        let received = self.core.cep_rx_count() as u32;
        let ep = &mut self.cep;
        let room = ep.remaining().min(received);
        if let CepSource::Caller(buf) = self.cep_source {
            // Safety: as in `write_cep_packet`; writability was checked when
            // the class driver handed the buffer over.
            let dst = unsafe { buf.slice_mut(ep.xfr_count as usize, room as usize) };
            self.core.read_fifo(0, dst);
        }
        ep.txn_length = room;
        ep.advance(room);

        if room < received {
            warn!("USBD: control OUT packet of {} bytes, {} expected", received, room);
            self.core.cep_set(CepCsr::FLUSH_FIFO);
            self.class.cep_rx_done(EpStatus::OVERRUN);
            self.cep_stall();
            return;
        }

        if self.cep.xfr_count == self.cep.xfr_length {
            trace!("USBD: control OUT done, {} bytes", self.cep.xfr_count);
            self.class.cep_rx_done(EpStatus::empty());
            self.cep_idle();
            self.core.cep_set(CepCsr::SERVICED_RX_PKT_RDY | CepCsr::DATA_END);
        } else {
            self.core.cep_set(CepCsr::SERVICED_RX_PKT_RDY);
            self.next_cep_txn();
        }
    }

    fn class_request(&mut self, setup: &SetupPacket) -> Stage {
        match self.class.process_request(setup) {
            Response::Stall => Stage::Stall,
            Response::Ack => Stage::Ack,
            Response::Data(buf) => match setup.direction() {
                UsbDirection::In => Stage::Send(CepSource::Caller(buf), buf.len() as u32),
                UsbDirection::Out => {
                    if buf.is_writable() && buf.len() >= setup.length as usize {
                        Stage::Receive(buf, setup.length as u32)
                    } else {
                        Stage::Stall
                    }
                }
            },
        }
    }

    fn standard_request(&mut self, setup: &SetupPacket) -> Stage {
        match setup.std_request() {
            Some(StdRequest::GetDescriptor) => self.get_descriptor(setup),
            Some(StdRequest::SetAddress) => self.set_address(setup),
            Some(StdRequest::SetConfiguration) => self.set_configuration(setup),
            Some(StdRequest::GetConfiguration) => {
                if setup.value == 0 && setup.index == 0 && setup.length == 1 {
                    self.scratch[0] = self.active_config;
                    Stage::Send(CepSource::Scratch, 1)
                } else {
                    Stage::Stall
                }
            }
            Some(StdRequest::GetStatus) => self.get_status(setup),
            Some(StdRequest::SetFeature) => self.set_feature(setup),
            Some(StdRequest::ClearFeature) => self.clear_feature(setup),
            Some(StdRequest::SetInterface) => {
                self.active_interface = setup.value as u8;
                Stage::Ack
            }
            Some(StdRequest::GetInterface) => {
                self.scratch[0] = self.active_interface;
                Stage::Send(CepSource::Scratch, 1)
            }
            Some(StdRequest::SetDescriptor) | Some(StdRequest::SynchFrame) | None => Stage::Stall,
        }
    }

    fn get_descriptor(&mut self, setup: &SetupPacket) -> Stage {
        if self.state < DeviceState::Default || setup.direction() != UsbDirection::In {
            return Stage::Stall;
        }

        let desc_type = setup.descriptor_type();
        let index = setup.descriptor_index();
        let plain = index == 0 && setup.index == 0;
        let hs_capable = self.config.speed == UsbSpeed::High;
        let recipient = setup.recipient();

        let allowed = match recipient {
            Recipient::Device => match DescriptorType::from_u8(desc_type) {
                Some(DescriptorType::Device) => plain,
                Some(DescriptorType::String) | Some(DescriptorType::Configuration) => true,
                // a full-speed-only device has no other speed to describe
                Some(DescriptorType::DeviceQualifier)
                | Some(DescriptorType::OtherSpeedConfiguration) => hs_capable && plain,
                _ => false,
            },
            Recipient::Interface => true,
            Recipient::Endpoint => desc_type != 0,
            Recipient::Other => false,
        };
        if !allowed {
            return Stage::Stall;
        }

        match self.class.get_descriptor(recipient, desc_type, index, self.speed) {
            Some(buf) => Stage::Send(CepSource::Caller(buf), buf.len() as u32),
            None => Stage::Stall,
        }
    }

    /// The address register is written by `end_zero_data_request`, after
    /// the status stage.
    fn set_address(&mut self, setup: &SetupPacket) -> Stage {
        let addr = (setup.value & 0x7F) as u8;
        match self.state {
            DeviceState::Configured => return Stage::Stall,
            DeviceState::Default if addr != 0 => self.state = DeviceState::Address,
            DeviceState::Address if addr == 0 => self.state = DeviceState::Default,
            _ => {}
        }
        self.address = addr;
        self.pending = Pending::SetAddress(addr);
        Stage::Ack
    }

    fn set_configuration(&mut self, setup: &SetupPacket) -> Stage {
        let config = setup.value as u8;
        match self.state {
            DeviceState::Default => return Stage::Stall,
            DeviceState::Address => {
                if config != 0 {
                    self.state = DeviceState::Configured;
                    debug!("USBD: configured ({})", config);
                    self.class.init(config, self.speed);
                }
            }
            DeviceState::Configured => {
                if config == 0 {
                    self.state = DeviceState::Address;
                    debug!("USBD: unconfigured");
                    self.class.release(config);
                } else {
                    self.class.init(config, self.speed);
                }
            }
            _ => {}
        }
        self.active_config = config;
        Stage::Ack
    }

    fn halted(&self, index: u16) -> Option<bool> {
        let addr = index as u8;
        let num = (addr & 0x7F) as usize;
        if num >= MAX_ENDPOINTS {
            return None;
        }
        if num == 0 {
            return Some(false);
        }
        let eps = if addr & 0x80 != 0 { &self.tx } else { &self.rx };
        Some(eps[num].stalled)
    }

    fn get_status(&mut self, setup: &SetupPacket) -> Stage {
        if setup.value != 0 || setup.length != 2 {
            return Stage::Stall;
        }
        let device_status =
            self.config.self_powered as u16 | (self.remote_wakeup as u16) << 1;

        let status = match (self.state, setup.recipient()) {
            (DeviceState::Address, _) if setup.index != 0 => None,
            (DeviceState::Address | DeviceState::Configured, Recipient::Device) => {
                Some(device_status)
            }
            (DeviceState::Address, Recipient::Interface) => Some(0),
            (DeviceState::Configured, Recipient::Interface) => {
                (setup.index < self.config.interface_count as u16).then_some(0)
            }
            (DeviceState::Address | DeviceState::Configured, Recipient::Endpoint) => {
                self.halted(setup.index).map(u16::from)
            }
            _ => None,
        };

        match status {
            Some(status) => {
                LittleEndian::write_u16(&mut self.scratch, status);
                Stage::Send(CepSource::Scratch, 2)
            }
            None => Stage::Stall,
        }
    }

    fn set_feature(&mut self, setup: &SetupPacket) -> Stage {
        if setup.length != 0 {
            return Stage::Stall;
        }
        let recipient = setup.recipient();
        match setup.value {
            FEATURE_REMOTE_WAKEUP
                if recipient == Recipient::Device && self.state > DeviceState::Default =>
            {
                self.remote_wakeup = true;
                Stage::Ack
            }
            FEATURE_ENDPOINT_HALT
                if recipient == Recipient::Endpoint
                    && setup.index as u8 != 0
                    && self.state == DeviceState::Configured =>
            {
                let addr = setup.index as u8;
                match self.stall_endpoint(addr & 0x7F, halt_dir(addr)) {
                    Ok(()) => Stage::Ack,
                    Err(_) => Stage::Stall,
                }
            }
            FEATURE_TEST_MODE if recipient == Recipient::Device && setup.index & 0xFF == 0 => {
                match TestMode::from_selector((setup.index >> 8) as u8) {
                    Some(mode) => {
                        self.pending = Pending::TestMode(mode);
                        Stage::Ack
                    }
                    None => Stage::Stall,
                }
            }
            _ => Stage::Stall,
        }
    }

    fn clear_feature(&mut self, setup: &SetupPacket) -> Stage {
        if setup.length != 0 || self.state <= DeviceState::Default {
            return Stage::Stall;
        }
        let recipient = setup.recipient();
        match setup.value {
            FEATURE_REMOTE_WAKEUP => {
                if recipient == Recipient::Device {
                    self.remote_wakeup = false;
                }
                Stage::Ack
            }
            FEATURE_ENDPOINT_HALT => {
                let addr = setup.index as u8;
                // the control endpoint's halt clears itself
                if recipient == Recipient::Endpoint
                    && addr & 0x7F != 0
                    && self.clear_stall(addr & 0x7F, halt_dir(addr)).is_err()
                {
                    return Stage::Stall;
                }
                Stage::Ack
            }
            _ => Stage::Stall,
        }
    }
}

/// Pipe half addressed by a wIndex endpoint address: IN endpoints are TX.
fn halt_dir(addr: u8) -> PipeDir {
    if addr & 0x80 != 0 {
        PipeDir::Tx
    } else {
        PipeDir::Rx
    }
}
