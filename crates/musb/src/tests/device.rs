use std::prelude::rust_2021::*;

use super::fixtures::*;
use super::mock::{Op, TestBuf};
use crate::buffer::Buffer;
use crate::config::{DeviceConfig, EndpointConfig};
use crate::descriptors::DescriptorType;
use crate::device::{CepState, Response, RELEASE_ON_DISCONNECT};
use crate::endpoint::{EpState, TransferPolicy};
use crate::error::Error;
use crate::regs::{CepCsr, EpCsr, UsbIrq};
use crate::request::{
    construct_get_descriptor_command, Recipient, RequestKind, SetupPacket, StdRequest,
    FEATURE_ENDPOINT_HALT, FEATURE_REMOTE_WAKEUP, FEATURE_TEST_MODE,
};
use crate::types::{
    DeviceState, EpStatus, PipeDir, TestMode, TransferType, UsbDirection, UsbSpeed,
};

fn standard(
    dir: UsbDirection,
    recipient: Recipient,
    request: StdRequest,
    value: u16,
    index: u16,
    length: u16,
) -> SetupPacket {
    SetupPacket::new(dir, RequestKind::Standard, recipient, request as u8, value, index, length)
}

fn device_feature(request: StdRequest, feature: u16, index: u16) -> SetupPacket {
    standard(UsbDirection::Out, Recipient::Device, request, feature, index, 0)
}

fn class_request(dir: UsbDirection, request: u8, length: u16) -> SetupPacket {
    SetupPacket::new(dir, RequestKind::Class, Recipient::Interface, request, 0, 0, length)
}

fn get_descriptor(desc_type: DescriptorType, length: u16) -> SetupPacket {
    construct_get_descriptor_command(RequestKind::Standard, Recipient::Device, desc_type, 0, length)
}

fn get_status(recipient: Recipient, index: u16) -> SetupPacket {
    standard(UsbDirection::In, recipient, StdRequest::GetStatus, 0, index, 2)
}

fn bulk(number: u8, max_pkt_size: u16, fifo_size: u16) -> EndpointConfig {
    EndpointConfig {
        number,
        xfr_type: TransferType::Bulk,
        max_pkt_size,
        fifo_size,
        ..Default::default()
    }
}

fn stalled(dev: &Device) -> bool {
    dev.core()
        .position(&Op::CepSet(CepCsr::SEND_STALL | CepCsr::SERVICED_RX_PKT_RDY))
        .is_some()
}

#[test]
fn reset_puts_device_in_default() {
    let dev = device();
    assert_eq!(dev.state(), DeviceState::Default);
    assert_eq!(dev.speed(), UsbSpeed::High);
    assert_eq!(dev.address(), 0);
    assert!(dev.core().soft_connect);
    assert!(dev.core().usb_irq_enabled.contains(UsbIrq::SUSPEND | UsbIrq::DISCONNECT));

    let fs = device_with(DeviceConfig {
        speed: UsbSpeed::Full,
        ..DeviceConfig::default()
    });
    assert_eq!(fs.speed(), UsbSpeed::Full);
}

#[test]
fn address_written_after_status_stage() {
    let mut dev = device();
    dev.core_mut().clear_ops();
    send_setup(&mut dev, SetupPacket::set_address(5));

    let core = dev.core();
    let status = core
        .position(&Op::CepSet(CepCsr::SERVICED_RX_PKT_RDY | CepCsr::DATA_END))
        .unwrap();
    let delay = core.position(&Op::DelayUs(100)).unwrap();
    let write = core.position(&Op::FunctionAddress(5)).unwrap();
    assert!(status < delay && delay < write);
    assert_eq!(core.function_address, 5);
    assert_eq!(dev.state(), DeviceState::Address);
    assert_eq!(dev.address(), 5);
    assert_eq!(dev.cep_state(), CepState::Idle);
}

#[test]
fn set_address_refused_when_configured() {
    let mut dev = configured_device();
    send_setup(&mut dev, SetupPacket::set_address(7));

    assert!(stalled(&dev));
    assert_eq!(dev.core().count(&Op::FunctionAddress(7)), 0);
    assert_eq!(dev.state(), DeviceState::Configured);
    assert_eq!(dev.address(), 5);
}

#[test]
fn address_zero_returns_to_default() {
    let mut dev = device();
    send_setup(&mut dev, SetupPacket::set_address(5));
    send_setup(&mut dev, SetupPacket::set_address(0));
    assert_eq!(dev.state(), DeviceState::Default);
    assert_eq!(dev.core().function_address, 0);
}

#[test]
fn configuration_state_machine() {
    let mut dev = device();
    send_setup(&mut dev, SetupPacket::set_configuration(1));
    assert!(stalled(&dev));
    assert_eq!(dev.state(), DeviceState::Default);
    assert!(dev.class_driver().inits.is_empty());

    send_setup(&mut dev, SetupPacket::set_address(5));
    send_setup(&mut dev, SetupPacket::set_configuration(1));
    assert_eq!(dev.state(), DeviceState::Configured);
    assert_eq!(dev.active_configuration(), 1);
    assert_eq!(dev.class_driver().inits, vec![(1, UsbSpeed::High)]);

    send_setup(&mut dev, SetupPacket::set_configuration(0));
    assert_eq!(dev.state(), DeviceState::Address);
    assert_eq!(dev.active_configuration(), 0);
    assert_eq!(dev.class_driver().releases, vec![0]);

    send_setup(&mut dev, SetupPacket::set_configuration(2));
    assert_eq!(dev.state(), DeviceState::Configured);
    assert_eq!(dev.class_driver().inits, vec![(1, UsbSpeed::High), (2, UsbSpeed::High)]);
}

#[test]
fn get_configuration_reports_active_value() {
    let mut dev = configured_device();
    send_setup(
        &mut dev,
        standard(UsbDirection::In, Recipient::Device, StdRequest::GetConfiguration, 0, 0, 1),
    );
    assert_eq!(dev.core().written(0), vec![vec![1]]);
    assert!(dev
        .core()
        .position(&Op::CepSet(CepCsr::TX_PKT_RDY | CepCsr::DATA_END))
        .is_some());
    assert_eq!(dev.cep_state(), CepState::Tx);

    cep_sent(&mut dev);
    assert_eq!(dev.cep_state(), CepState::Idle);
    assert_eq!(dev.class_driver().cep_tx_done, vec![EpStatus::empty()]);
}

#[test]
fn device_descriptor_fits_one_packet() {
    let mut dev = device();
    dev.core_mut().clear_ops();
    send_setup(&mut dev, get_descriptor(DescriptorType::Device, 64));

    assert_eq!(
        dev.core().written(0),
        vec![device_descriptor(0x1234, 0x5678).to_vec()]
    );
    assert_eq!(
        dev.core().count(&Op::CepSet(CepCsr::TX_PKT_RDY | CepCsr::DATA_END)),
        1
    );
    assert_eq!(dev.core().count(&Op::CepSet(CepCsr::TX_PKT_RDY)), 0);

    cep_sent(&mut dev);
    assert_eq!(dev.class_driver().cep_tx_done, vec![EpStatus::empty()]);
    assert_eq!(dev.cep_state(), CepState::Idle);
}

#[test]
fn configuration_descriptor_spans_packets() {
    let mut dev = device();
    dev.core_mut().clear_ops();
    send_setup(&mut dev, get_descriptor(DescriptorType::Configuration, 255));
    assert_eq!(dev.core().count(&Op::CepSet(CepCsr::TX_PKT_RDY)), 1);

    cep_sent(&mut dev);
    assert_eq!(dev.cep_state(), CepState::Tx);
    assert!(dev.class_driver().cep_tx_done.is_empty());
    cep_sent(&mut dev);

    let lens: Vec<usize> = dev.core().written(0).iter().map(Vec::len).collect();
    assert_eq!(lens, vec![64, 36]);
    assert_eq!(
        dev.core().count(&Op::CepSet(CepCsr::TX_PKT_RDY | CepCsr::DATA_END)),
        1
    );
    assert_eq!(dev.class_driver().cep_tx_done, vec![EpStatus::empty()]);
}

#[test]
fn descriptor_clamped_to_requested_length() {
    let mut dev = device();
    dev.core_mut().clear_ops();
    send_setup(&mut dev, get_descriptor(DescriptorType::Device, 8));
    assert_eq!(
        dev.core().written(0),
        vec![device_descriptor(0x1234, 0x5678)[..8].to_vec()]
    );
}

#[test]
fn qualifier_only_on_high_speed_capable_devices() {
    let mut fs = device_with(DeviceConfig {
        speed: UsbSpeed::Full,
        ..DeviceConfig::default()
    });
    send_setup(&mut fs, get_descriptor(DescriptorType::DeviceQualifier, 10));
    assert!(stalled(&fs));
    assert!(fs.core().written(0).is_empty());

    let mut hs = device();
    send_setup(&mut hs, get_descriptor(DescriptorType::DeviceQualifier, 10));
    assert!(!stalled(&hs));
    assert_eq!(hs.core().written(0)[0].len(), 10);
}

#[test]
fn unknown_descriptor_stalls() {
    let mut dev = device();
    send_setup(&mut dev, get_descriptor(DescriptorType::String, 255));
    assert!(stalled(&dev));
}

#[test]
fn device_status_and_remote_wakeup() {
    let mut dev = configured_device();
    send_setup(&mut dev, get_status(Recipient::Device, 0));
    assert_eq!(dev.core().written(0), vec![vec![1, 0]]);
    cep_sent(&mut dev);

    dev.core_mut().clear_ops();
    send_setup(
        &mut dev,
        device_feature(StdRequest::SetFeature, FEATURE_REMOTE_WAKEUP, 0),
    );
    assert!(dev.remote_wakeup_enabled());
    send_setup(&mut dev, get_status(Recipient::Device, 0));
    assert_eq!(dev.core().written(0), vec![vec![3, 0]]);
    cep_sent(&mut dev);

    send_setup(
        &mut dev,
        device_feature(StdRequest::ClearFeature, FEATURE_REMOTE_WAKEUP, 0),
    );
    assert!(!dev.remote_wakeup_enabled());
}

#[test]
fn interface_status_checks_index() {
    let mut dev = configured_device();
    send_setup(&mut dev, get_status(Recipient::Interface, 0));
    assert_eq!(dev.core().written(0), vec![vec![0, 0]]);
    cep_sent(&mut dev);

    send_setup(&mut dev, get_status(Recipient::Interface, 1));
    assert!(stalled(&dev));
}

#[test]
fn endpoint_halt_feature() {
    let mut dev = configured_device();
    let halt = |request| {
        standard(UsbDirection::Out, Recipient::Endpoint, request, FEATURE_ENDPOINT_HALT, 0x81, 0)
    };

    send_setup(&mut dev, halt(StdRequest::SetFeature));
    assert!(dev
        .core()
        .position(&Op::EpSet(1, PipeDir::Tx, EpCsr::SEND_STALL))
        .is_some());
    assert!(dev.tx_endpoint(1).unwrap().stalled);
    assert!(!dev.rx_endpoint(1).unwrap().stalled);

    send_setup(&mut dev, get_status(Recipient::Endpoint, 0x81));
    assert_eq!(dev.core().written(0), vec![vec![1, 0]]);
    cep_sent(&mut dev);

    send_setup(&mut dev, halt(StdRequest::ClearFeature));
    assert!(!dev.tx_endpoint(1).unwrap().stalled);
    assert!(dev
        .core()
        .position(&Op::EpClear(1, PipeDir::Tx, EpCsr::SEND_STALL | EpCsr::SENT_STALL))
        .is_some());
    assert!(dev
        .core()
        .position(&Op::EpSet(1, PipeDir::Tx, EpCsr::CLR_DATA_TOG))
        .is_some());

    dev.core_mut().clear_ops();
    send_setup(&mut dev, get_status(Recipient::Endpoint, 0x85));
    assert!(stalled(&dev));
}

#[test]
fn test_mode_entered_after_status() {
    let mut dev = device();
    dev.core_mut().clear_ops();
    send_setup(
        &mut dev,
        device_feature(StdRequest::SetFeature, FEATURE_TEST_MODE, 0x0400),
    );
    let core = dev.core();
    let status = core
        .position(&Op::CepSet(CepCsr::SERVICED_RX_PKT_RDY | CepCsr::DATA_END))
        .unwrap();
    let mode = core.position(&Op::TestMode(TestMode::Packet)).unwrap();
    assert!(status < mode);

    let mut dev = device();
    send_setup(
        &mut dev,
        device_feature(StdRequest::SetFeature, FEATURE_TEST_MODE, 0x0900),
    );
    assert!(stalled(&dev));
}

#[test]
fn interface_alternate_setting() {
    let mut dev = configured_device();
    send_setup(
        &mut dev,
        standard(UsbDirection::Out, Recipient::Interface, StdRequest::SetInterface, 2, 0, 0),
    );
    assert_eq!(dev.active_interface(), 2);
    send_setup(
        &mut dev,
        standard(UsbDirection::In, Recipient::Interface, StdRequest::GetInterface, 0, 0, 1),
    );
    assert_eq!(dev.core().written(0), vec![vec![2]]);
}

#[test]
fn unsupported_standard_requests_stall() {
    let mut dev = configured_device();
    send_setup(
        &mut dev,
        standard(UsbDirection::In, Recipient::Endpoint, StdRequest::SynchFrame, 0, 0x81, 2),
    );
    assert!(stalled(&dev));
    assert!(dev.class_driver().requests.is_empty());
}

#[test]
fn class_out_request_fills_caller_buffer() {
    let mut dev = configured_device();
    let buf = TestBuf::zeroed(16);
    dev.class_driver_mut().response = Some(Response::Data(buf.buf));

    let setup = class_request(UsbDirection::Out, 0x09, 16);
    send_setup(&mut dev, setup);
    assert_eq!(dev.cep_state(), CepState::Rx);
    assert_eq!(dev.class_driver().requests, vec![setup]);

    let payload: Vec<u8> = (0..16).collect();
    cep_receive(&mut dev, &payload);
    assert_eq!(buf.bytes(), &payload[..]);
    assert_eq!(dev.class_driver().cep_rx_done, vec![EpStatus::empty()]);
    assert_eq!(dev.cep_state(), CepState::Idle);
    assert!(dev
        .core()
        .position(&Op::CepSet(CepCsr::SERVICED_RX_PKT_RDY | CepCsr::DATA_END))
        .is_some());
}

#[test]
fn class_out_packet_larger_than_request_stalls() {
    let mut dev = configured_device();
    let buf = TestBuf::zeroed(4);
    dev.class_driver_mut().response = Some(Response::Data(buf.buf));

    let setup = class_request(UsbDirection::Out, 0x09, 4);
    send_setup(&mut dev, setup);
    cep_receive(&mut dev, &[0xAA; 8]);

    assert_eq!(dev.class_driver().cep_rx_done, vec![EpStatus::OVERRUN]);
    assert!(stalled(&dev));
    assert_eq!(dev.cep_state(), CepState::Idle);
}

#[test]
fn vendor_in_request_sends_class_data() {
    let mut dev = configured_device();
    let buf = TestBuf::from_bytes(&[1, 2, 3]);
    dev.class_driver_mut().response = Some(Response::Data(buf.buf));

    let setup =
        SetupPacket::new(UsbDirection::In, RequestKind::Vendor, Recipient::Device, 0x42, 0, 0, 64);
    send_setup(&mut dev, setup);
    assert_eq!(dev.core().written(0), vec![vec![1, 2, 3]]);
}

#[test]
fn short_reply_ending_on_full_packet_gets_zero_length_packet() {
    let mut dev = configured_device();
    let buf = TestBuf::from_bytes(&[7; 64]);
    dev.class_driver_mut().response = Some(Response::Data(buf.buf));
    dev.core_mut().clear_ops();

    let setup =
        SetupPacket::new(UsbDirection::In, RequestKind::Vendor, Recipient::Device, 0x42, 0, 0, 255);
    send_setup(&mut dev, setup);
    assert_eq!(dev.core().count(&Op::CepSet(CepCsr::TX_PKT_RDY)), 1);

    cep_sent(&mut dev);
    assert_eq!(dev.cep_state(), CepState::Tx);
    assert!(dev.class_driver().cep_tx_done.is_empty());
    cep_sent(&mut dev);

    let lens: Vec<usize> = dev.core().written(0).iter().map(Vec::len).collect();
    assert_eq!(lens, vec![64, 0]);
    assert_eq!(
        dev.core().count(&Op::CepSet(CepCsr::TX_PKT_RDY | CepCsr::DATA_END)),
        1
    );
    assert_eq!(dev.class_driver().cep_tx_done, vec![EpStatus::empty()]);
    assert_eq!(dev.cep_state(), CepState::Idle);

    // a reply that fills wLength exactly needs no terminator
    dev.core_mut().clear_ops();
    let exact =
        SetupPacket::new(UsbDirection::In, RequestKind::Vendor, Recipient::Device, 0x42, 0, 0, 64);
    send_setup(&mut dev, exact);
    cep_sent(&mut dev);
    assert_eq!(dev.core().written(0), vec![vec![7; 64]]);
    assert_eq!(dev.class_driver().cep_tx_done.len(), 2);
}

#[test]
fn class_ack_needs_zero_length() {
    let mut dev = configured_device();
    dev.class_driver_mut().response = Some(Response::Ack);

    let ack = class_request(UsbDirection::Out, 0x0A, 0);
    send_setup(&mut dev, ack);
    assert!(!stalled(&dev));
    assert!(dev
        .core()
        .position(&Op::CepSet(CepCsr::SERVICED_RX_PKT_RDY | CepCsr::DATA_END))
        .is_some());

    let with_data = class_request(UsbDirection::Out, 0x0A, 4);
    send_setup(&mut dev, with_data);
    assert!(stalled(&dev));
}

#[test]
fn unanswered_class_request_stalls() {
    let mut dev = configured_device();
    let setup = class_request(UsbDirection::In, 0xFE, 1);
    send_setup(&mut dev, setup);
    assert!(stalled(&dev));
    assert_eq!(dev.class_driver().requests.len(), 1);
}

#[test]
fn setup_end_cuts_data_stage_short() {
    let mut dev = device();
    send_setup(&mut dev, get_descriptor(DescriptorType::Configuration, 255));
    assert_eq!(dev.cep_state(), CepState::Tx);

    // the next SETUP is already waiting behind the early end
    let next = standard(UsbDirection::In, Recipient::Device, StdRequest::GetStatus, 0, 0, 2);
    dev.core_mut().clear_ops();
    dev.core_mut().load_rx(0, &next.to_bytes());
    dev.core_mut().cep |= CepCsr::SETUP_END | CepCsr::RX_PKT_RDY;
    cep_sent(&mut dev);

    assert_eq!(dev.class_driver().cep_tx_done, vec![EpStatus::SETUP_END]);
    assert!(dev
        .core()
        .position(&Op::CepSet(CepCsr::SERVICED_SETUP_END))
        .is_some());
    // GET_STATUS in Default is not answered
    assert!(stalled(&dev));
    assert_eq!(dev.cep_state(), CepState::Idle);
}

#[test]
fn sent_stall_returns_to_idle() {
    let mut dev = configured_device();
    send_setup(
        &mut dev,
        standard(UsbDirection::In, Recipient::Device, StdRequest::SynchFrame, 0, 0, 2),
    );
    dev.core_mut().cep |= CepCsr::STALL;
    cep_sent(&mut dev);
    assert!(dev.core().position(&Op::CepClear(CepCsr::STALL)).is_some());
    assert!(!dev.core().cep.contains(CepCsr::STALL));
    assert_eq!(dev.cep_state(), CepState::Idle);
}

#[test]
fn malformed_setup_packet_stalls() {
    let mut dev = device();
    dev.core_mut().clear_ops();
    dev.core_mut().load_rx(0, &[0x80, 6, 0, 1, 0, 0]);
    dev.core_mut().cep |= CepCsr::RX_PKT_RDY;
    cep_sent(&mut dev);

    assert!(dev.core().position(&Op::CepSet(CepCsr::FLUSH_FIFO)).is_some());
    assert!(stalled(&dev));
    assert!(dev.core().rx_fifo[0].is_empty());
    assert_eq!(dev.state(), DeviceState::Default);
}

#[test]
fn suspend_and_resume_restore_state() {
    let mut dev = configured_device();
    dev.core_mut().usb_irq |= UsbIrq::SUSPEND;
    dev.interrupt();
    assert_eq!(dev.state(), DeviceState::Suspended);
    assert!(dev.core().usb_irq_enabled.contains(UsbIrq::RESUME));

    dev.core_mut().usb_irq |= UsbIrq::RESUME;
    dev.interrupt();
    assert_eq!(dev.state(), DeviceState::Configured);
}

#[test]
fn disconnect_releases_configuration() {
    let mut dev = configured_device();
    dev.configure_endpoint(PipeDir::Tx, &bulk(1, 512, 1024)).unwrap();
    dev.core_mut().usb_irq |= UsbIrq::DISCONNECT;
    dev.interrupt();

    assert_eq!(dev.state(), DeviceState::NotAttached);
    assert_eq!(dev.class_driver().releases, vec![RELEASE_ON_DISCONNECT]);
    assert!(dev
        .core()
        .ep_irq_enabled
        .iter()
        .all(|dirs| dirs.iter().all(|on| !on)));
}

#[test]
fn bus_reset_forgets_address_and_configuration() {
    let mut dev = configured_device();
    dev.core_mut().hs_mode = false;
    dev.core_mut().usb_irq |= UsbIrq::RESET_BABBLE;
    dev.interrupt();
    assert_eq!(dev.state(), DeviceState::Default);
    assert_eq!(dev.address(), 0);
    assert_eq!(dev.active_configuration(), 0);
    assert_eq!(dev.speed(), UsbSpeed::Full);
}

#[test]
fn start_of_frame_forwarded() {
    let mut dev = configured_device();
    dev.core_mut().frame = 7;
    dev.core_mut().usb_irq |= UsbIrq::SOF;
    dev.interrupt();
    assert_eq!(dev.class_driver().sofs, vec![7]);
}

#[test]
fn endpoint_configuration_limits() {
    let mut dev = configured_device();
    assert_eq!(
        dev.configure_endpoint(PipeDir::Tx, &bulk(1, 1024, 2048)),
        Err(Error::InvalidPacketSize)
    );
    assert_eq!(
        dev.configure_endpoint(PipeDir::Tx, &bulk(1, 512, 256)),
        Err(Error::InvalidFifo)
    );
    assert_eq!(
        dev.configure_endpoint(PipeDir::Tx, &bulk(1, 512, 1004)),
        Err(Error::InvalidFifo)
    );
    assert_eq!(
        dev.configure_endpoint(PipeDir::Tx, &bulk(0, 64, 64)),
        Err(Error::InvalidEndpoint(0))
    );
    assert_eq!(
        dev.configure_endpoint(PipeDir::Tx, &bulk(5, 64, 64)),
        Err(Error::InvalidEndpoint(5))
    );

    dev.configure_endpoint(PipeDir::Tx, &bulk(1, 512, 1024)).unwrap();
    assert!(dev.tx_endpoint(1).unwrap().dpb);
    dev.configure_endpoint(PipeDir::Rx, &bulk(1, 512, 512)).unwrap();
    assert!(!dev.rx_endpoint(1).unwrap().dpb);
    assert_eq!(dev.core().ep_irq_enabled[1], [true, true]);

    let mut fs = device_with(DeviceConfig {
        speed: UsbSpeed::Full,
        ..DeviceConfig::default()
    });
    assert_eq!(
        fs.configure_endpoint(PipeDir::Rx, &bulk(2, 512, 512)),
        Err(Error::InvalidPacketSize)
    );
    fs.configure_endpoint(PipeDir::Rx, &bulk(2, 64, 128)).unwrap();
}

#[test]
fn data_endpoint_api_rejects_misuse() {
    let mut dev = configured_device();
    let buf = TestBuf::zeroed(64);
    assert_eq!(dev.write_endpoint(1, buf.buf, 64), Err(Error::NotConfigured));

    dev.configure_endpoint(PipeDir::Tx, &bulk(1, 512, 512)).unwrap();
    assert_eq!(dev.write_endpoint(1, buf.buf, 65), Err(Error::BufferTooSmall));
    dev.write_endpoint(1, buf.buf, 64).unwrap();
    assert_eq!(dev.write_endpoint(1, buf.buf, 64), Err(Error::PipeBusy));
    assert_eq!(
        dev.configure_endpoint(PipeDir::Tx, &bulk(1, 512, 512)),
        Err(Error::PipeBusy)
    );
    assert!(!dev.endpoint_idle(1, PipeDir::Tx));

    dev.configure_endpoint(PipeDir::Rx, &bulk(1, 512, 512)).unwrap();
    static READ_ONLY: [u8; 8] = [0; 8];
    let ro = Buffer::from_static(&READ_ONLY);
    assert_eq!(dev.read_endpoint(1, ro, 8), Err(Error::BufferNotWritable));
    assert_eq!(dev.stall_endpoint(0, PipeDir::Rx), Err(Error::InvalidEndpoint(0)));
}

#[test]
fn bulk_out_two_full_packets_without_dma() {
    let mut dev = configured_device();
    dev.configure_endpoint(PipeDir::Rx, &bulk(1, 512, 1024)).unwrap();
    let buf = TestBuf::zeroed(1024);
    dev.read_endpoint(1, buf.buf, 1024).unwrap();

    dev.core_mut().clear_ops();
    dev.core_mut().receive(1, &[0x11; 512]);
    dev.interrupt();
    assert!(dev.class_driver().rx_done.is_empty());

    let core = dev.core();
    let masked = core.position(&Op::DisableEpIrq(1, PipeDir::Rx)).unwrap();
    let read = core.position(&Op::ReadFifo(1, 512)).unwrap();
    let unmasked = core.position(&Op::EnableEpIrq(1, PipeDir::Rx)).unwrap();
    assert!(masked < read && read < unmasked);

    dev.core_mut().receive(1, &[0x22; 512]);
    dev.interrupt();
    assert_eq!(dev.class_driver().rx_done, vec![(1, EpStatus::empty(), 1024)]);
    assert_eq!(&buf.bytes()[..512], &[0x11; 512][..]);
    assert_eq!(&buf.bytes()[512..], &[0x22; 512][..]);
    assert_eq!(dev.rx_endpoint(1).unwrap().state, EpState::Done(EpStatus::empty()));
}

#[test]
fn bulk_out_short_packet_ends_transfer() {
    let mut dev = configured_device();
    dev.configure_endpoint(PipeDir::Rx, &bulk(1, 512, 1024)).unwrap();
    let buf = TestBuf::zeroed(1000);
    dev.read_endpoint(1, buf.buf, 1000).unwrap();

    dev.core_mut().receive(1, &[1; 512]);
    dev.interrupt();
    dev.core_mut().receive(1, &[2; 100]);
    dev.interrupt();
    assert_eq!(dev.class_driver().rx_done, vec![(1, EpStatus::empty(), 612)]);
}

#[test]
fn packet_waiting_before_read_is_picked_up() {
    let mut dev = configured_device();
    dev.configure_endpoint(PipeDir::Rx, &bulk(2, 64, 128)).unwrap();

    dev.core_mut().receive(2, &[9; 10]);
    dev.interrupt();
    assert!(dev.class_driver().rx_done.is_empty());
    assert!(dev.core().ep[2][1].contains(EpCsr::PKT_RDY));

    let buf = TestBuf::zeroed(64);
    dev.read_endpoint(2, buf.buf, 64).unwrap();
    assert_eq!(dev.class_driver().rx_done, vec![(2, EpStatus::empty(), 10)]);
    assert_eq!(&buf.bytes()[..10], &[9; 10][..]);
}

#[test]
fn out_endpoint_overrun_reported() {
    let mut dev = configured_device();
    dev.configure_endpoint(PipeDir::Rx, &bulk(1, 512, 512)).unwrap();
    let buf = TestBuf::zeroed(512);
    dev.read_endpoint(1, buf.buf, 512).unwrap();

    dev.core_mut().ep[1][1] |= EpCsr::OVERRUN;
    dev.core_mut().rx_irq |= 1 << 1;
    dev.interrupt();

    assert_eq!(dev.class_driver().rx_done, vec![(1, EpStatus::OVERRUN, 0)]);
    assert!(dev
        .core()
        .position(&Op::EpClear(1, PipeDir::Rx, EpCsr::OVERRUN))
        .is_some());
    assert!(!dev.core().ep[1][1].contains(EpCsr::OVERRUN));
}

#[test]
fn in_endpoint_underrun_reported() {
    let mut dev = configured_device();
    dev.configure_endpoint(PipeDir::Tx, &bulk(1, 512, 512)).unwrap();
    let buf = TestBuf::zeroed(100);
    dev.write_endpoint(1, buf.buf, 100).unwrap();

    dev.core_mut().ep[1][0] |= EpCsr::UNDERRUN;
    dev.core_mut().tx_irq |= 1 << 1;
    dev.interrupt();
    assert_eq!(dev.class_driver().tx_done, vec![(1, EpStatus::UNDERRUN, 0)]);
}

#[test]
fn bulk_in_zero_length_packet_follows_full_packet() {
    let mut dev = configured_device();
    dev.configure_endpoint(
        PipeDir::Tx,
        &EndpointConfig {
            policy: TransferPolicy::ZLP,
            ..bulk(1, 512, 512)
        },
    )
    .unwrap();
    let buf = TestBuf::from_bytes(&[5; 512]);
    dev.write_endpoint(1, buf.buf, 512).unwrap();

    dev.core_mut().tx_irq |= 1 << 1;
    dev.interrupt();
    assert_eq!(dev.tx_endpoint(1).unwrap().state, EpState::SendingZlp);
    assert!(dev.class_driver().tx_done.is_empty());

    dev.core_mut().tx_irq |= 1 << 1;
    dev.interrupt();
    let lens: Vec<usize> = dev.core().written(1).iter().map(Vec::len).collect();
    assert_eq!(lens, vec![512, 0]);
    assert_eq!(dev.class_driver().tx_done, vec![(1, EpStatus::empty(), 512)]);
}

#[test]
fn bulk_in_without_zlp_policy_ends_on_full_packet() {
    let mut dev = configured_device();
    dev.configure_endpoint(PipeDir::Tx, &bulk(1, 512, 1024)).unwrap();
    let buf = TestBuf::from_bytes(&[5; 1024]);
    dev.write_endpoint(1, buf.buf, 1024).unwrap();

    for _ in 0..2 {
        dev.core_mut().tx_irq |= 1 << 1;
        dev.interrupt();
    }
    let lens: Vec<usize> = dev.core().written(1).iter().map(Vec::len).collect();
    assert_eq!(lens, vec![512, 512]);
    assert_eq!(dev.class_driver().tx_done, vec![(1, EpStatus::empty(), 1024)]);
}

#[test]
fn flush_control_endpoint_fifo() {
    let mut dev = configured_device();
    dev.flush_fifo(0, PipeDir::Tx).unwrap();
    assert!(dev.core().position(&Op::CepSet(CepCsr::FLUSH_FIFO)).is_some());
    dev.flush_fifo(3, PipeDir::Rx).unwrap();
    assert!(dev
        .core()
        .position(&Op::EpSet(3, PipeDir::Rx, EpCsr::FLUSH_FIFO))
        .is_some());
    assert_eq!(dev.flush_fifo(7, PipeDir::Rx), Err(Error::InvalidEndpoint(7)));
}
