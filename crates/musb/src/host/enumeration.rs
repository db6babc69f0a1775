//! Enumeration of the attached device.
//!
//! Each step issues one internal control transfer and then waits for its
//! result on the next `task` pass; the bus reset and the SET_ADDRESS
//! recovery time are timed against the core's millisecond counter.

use core::fmt;

use log::{debug, trace};

use super::control::{CepData, ControlResult};
use super::{HostClassDriver, HostController, HostEvents};
use crate::config::HostConfig;
use crate::descriptors::{
    DescriptorType, UsbConfigurationDescriptor, UsbDeviceDescriptor, UsbInterfaceDescriptor,
    BCD_USB_1_0, BCD_USB_1_1, BCD_USB_2_0, BCD_USB_2_1, CLASS_HUB, CONFIGURATION_DESCRIPTOR_LEN,
    DEVICE_DESCRIPTOR_LEN,
};
use crate::regs::UsbCore;
use crate::request::SetupPacket;
use crate::timer::elapsed;
use crate::types::UsbSpeed;

/// The one device that is configured without a class check first.
pub const PET_VENDOR_ID: u16 = 0x1A0A;
pub const PET_PRODUCT_ID: u16 = 0x0200;

/// Reasons a device is refused. The numeric codes are the ones reported to
/// the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumError {
    DevDescWrongLength,
    DevDescWrongType,
    DevDescWrongUsbBcd,
    DevDescWrongMaxPktSize0,
    HsUsbBcdNot200,
    HsMaxPktSize0Not64,
    LsMaxPktSize0Not8,
    ConfDescWrongLength,
    ConfDescWrongType,
    PowerLimitExceeded,
    ClassDriverNotFree,
    ClassDriverNotMatched,
    HubClassNotSupported,
    LsDeviceNotSupported,
    FsDeviceNotSupported,
    ControlTransferFailed(ControlResult),
}

impl EnumError {
    pub fn code(self) -> i8 {
        match self {
            EnumError::DevDescWrongLength => -1,
            EnumError::DevDescWrongType => -2,
            EnumError::DevDescWrongUsbBcd => -3,
            EnumError::DevDescWrongMaxPktSize0 => -4,
            EnumError::HsUsbBcdNot200 => -5,
            EnumError::HsMaxPktSize0Not64 => -6,
            EnumError::LsMaxPktSize0Not8 => -7,
            EnumError::ConfDescWrongLength => -8,
            EnumError::ConfDescWrongType => -9,
            EnumError::PowerLimitExceeded => -10,
            EnumError::ClassDriverNotFree => -11,
            EnumError::ClassDriverNotMatched => -12,
            EnumError::HubClassNotSupported => -13,
            EnumError::LsDeviceNotSupported => -14,
            EnumError::FsDeviceNotSupported => -15,
            EnumError::ControlTransferFailed(_) => -16,
        }
    }
}

impl fmt::Display for EnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumError::DevDescWrongLength => write!(f, "device descriptor length is not 18"),
            EnumError::DevDescWrongType => write!(f, "device descriptor has the wrong type"),
            EnumError::DevDescWrongUsbBcd => write!(f, "unsupported bcdUSB"),
            EnumError::DevDescWrongMaxPktSize0 => write!(f, "invalid bMaxPacketSize0"),
            EnumError::HsUsbBcdNot200 => write!(f, "high-speed device without bcdUSB 2.x"),
            EnumError::HsMaxPktSize0Not64 => {
                write!(f, "high-speed device with bMaxPacketSize0 != 64")
            }
            EnumError::LsMaxPktSize0Not8 => write!(f, "low-speed device with bMaxPacketSize0 != 8"),
            EnumError::ConfDescWrongLength => write!(f, "configuration descriptor length is not 9"),
            EnumError::ConfDescWrongType => {
                write!(f, "configuration descriptor has the wrong type")
            }
            EnumError::PowerLimitExceeded => write!(f, "bMaxPower exceeds the bus budget"),
            EnumError::ClassDriverNotFree => write!(f, "class driver already in use"),
            EnumError::ClassDriverNotMatched => write!(f, "no class driver for this interface"),
            EnumError::HubClassNotSupported => write!(f, "hubs are not supported"),
            EnumError::LsDeviceNotSupported => write!(f, "low-speed devices are not supported"),
            EnumError::FsDeviceNotSupported => write!(f, "full-speed devices are not supported"),
            EnumError::ControlTransferFailed(result) => {
                write!(f, "control transfer failed: {:?}", result)
            }
        }
    }
}

/// Checks a (possibly partial) device descriptor. The first failing check
/// wins.
pub fn validate_device_descriptor(
    bytes: &[u8],
    speed: UsbSpeed,
    config: &HostConfig,
) -> Result<(), EnumError> {
    let desc = UsbDeviceDescriptor::parse(bytes);
    let bcd = desc.usb_version();
    let max_pkt0 = desc.max_packet_size0;

    if desc.descriptor_length as usize != DEVICE_DESCRIPTOR_LEN {
        return Err(EnumError::DevDescWrongLength);
    }
    if desc.descriptor_type != DescriptorType::Device as u8 {
        return Err(EnumError::DevDescWrongType);
    }
    if !matches!(bcd, BCD_USB_2_0 | BCD_USB_2_1 | BCD_USB_1_1 | BCD_USB_1_0) {
        return Err(EnumError::DevDescWrongUsbBcd);
    }
    if !matches!(max_pkt0, 8 | 16 | 32 | 64) {
        return Err(EnumError::DevDescWrongMaxPktSize0);
    }

    match speed {
        UsbSpeed::High => {
            if !matches!(bcd, BCD_USB_2_0 | BCD_USB_2_1) {
                return Err(EnumError::HsUsbBcdNot200);
            }
            if max_pkt0 != 64 {
                return Err(EnumError::HsMaxPktSize0Not64);
            }
        }
        UsbSpeed::Low => {
            if max_pkt0 != 8 {
                return Err(EnumError::LsMaxPktSize0Not8);
            }
            if !config.accept_low_speed {
                return Err(EnumError::LsDeviceNotSupported);
            }
        }
        UsbSpeed::Full => {
            if !config.accept_full_speed {
                return Err(EnumError::FsDeviceNotSupported);
            }
        }
    }
    Ok(())
}

pub fn validate_config_descriptor(bytes: &[u8], config: &HostConfig) -> Result<(), EnumError> {
    let desc = UsbConfigurationDescriptor::parse(bytes);
    if desc.descriptor_length as usize != CONFIGURATION_DESCRIPTOR_LEN {
        return Err(EnumError::ConfDescWrongLength);
    }
    if desc.descriptor_type != DescriptorType::Configuration as u8 {
        return Err(EnumError::ConfDescWrongType);
    }
    if desc.maximum_power > config.max_power {
        return Err(EnumError::PowerLimitExceeded);
    }
    Ok(())
}

/// Matches the first interface descriptor (following the configuration
/// descriptor in `config_bytes`) against the registered driver's class id.
pub fn check_class_support(
    config_bytes: &[u8],
    class_id: Option<u32>,
    assigned: bool,
) -> Result<(), EnumError> {
    let iface = config_bytes
        .get(CONFIGURATION_DESCRIPTOR_LEN..)
        .map(UsbInterfaceDescriptor::parse)
        .unwrap_or_default();

    if iface.class == CLASS_HUB {
        return Err(EnumError::HubClassNotSupported);
    }
    match class_id {
        Some(id) if id == iface.class_id() => {
            if assigned {
                Err(EnumError::ClassDriverNotFree)
            } else {
                Ok(())
            }
        }
        _ => Err(EnumError::ClassDriverNotMatched),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EnumState {
    #[default]
    Idle,
    GetShortDeviceDescriptor,
    WaitShortDeviceDescriptor,
    ResetDevice,
    ClearReset,
    SetAddress,
    WaitSetAddress,
    GetFullDeviceDescriptor,
    WaitFullDeviceDescriptor,
    GetShortConfigDescriptor,
    WaitShortConfigDescriptor,
    GetFullConfigDescriptor,
    WaitFullConfigDescriptor,
    CheckClassSupport,
    PetSetConfiguration,
    PetWaitSetConfiguration,
    Success,
    Error(EnumError),
}

#[derive(Debug, Default)]
pub(super) struct Enumerator {
    pub state: EnumState,
    since: u32,
    reset_released: bool,
}

impl Enumerator {
    pub fn start(&mut self) {
        self.state = EnumState::GetShortDeviceDescriptor;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl<C: UsbCore, U: HostEvents, K: HostClassDriver> HostController<C, U, K> {
    fn enum_step(&mut self, state: EnumState) {
        trace!("USBH enum: {:?} -> {:?}", self.enumeration.state, state);
        self.enumeration.state = state;
    }

    fn enum_fail(&mut self, err: EnumError) {
        debug!("USBH enum: {:?} failed: {}", self.enumeration.state, err);
        self.enumeration.state = EnumState::Error(err);
    }

    /// Result of the finished internal control transfer, if any.
    fn internal_result(&mut self) -> Option<ControlResult> {
        self.take_control_result()
    }

    pub(super) fn enumeration_task(&mut self) {
        let now = self.core.millis();

        match self.enumeration.state {
            EnumState::Idle | EnumState::Success | EnumState::Error(_) => {}

            EnumState::GetShortDeviceDescriptor => {
                self.request_descriptor(DescriptorType::Device, 8, CepData::DeviceDescriptor);
                self.enum_step(EnumState::WaitShortDeviceDescriptor);
            }
            EnumState::WaitShortDeviceDescriptor => match self.internal_result() {
                None => {}
                Some(ControlResult::Success) => {
                    self.device.max_pkt0 = self.descriptors.device[7];
                    self.enum_step(EnumState::ResetDevice);
                }
                Some(result) => self.enum_fail(EnumError::ControlTransferFailed(result)),
            },

            EnumState::ResetDevice => {
                self.enumeration.since = now;
                self.enumeration.reset_released = false;
                self.core.set_bus_reset(true);
                self.enum_step(EnumState::ClearReset);
            }
            EnumState::ClearReset => {
                let t = elapsed(self.enumeration.since, now);
                if !self.enumeration.reset_released && t >= self.config.reset_assert_ms {
                    self.core.set_bus_reset(false);
                    self.enumeration.reset_released = true;
                }
                if self.enumeration.reset_released
                    && t >= self.config.reset_assert_ms + self.config.reset_settle_ms
                {
                    self.enum_step(EnumState::SetAddress);
                }
            }

            EnumState::SetAddress => {
                self.configure_control_pipe(0);
                self.enumeration.since = now;
                let setup = SetupPacket::set_address(self.config.device_address);
                self.start_request(setup, CepData::None, true);
                self.enum_step(EnumState::WaitSetAddress);
            }
            EnumState::WaitSetAddress => {
                if !self.control_pipe_idle() {
                    return;
                }
                match self.control.result {
                    None => {}
                    Some(ControlResult::Success) => {
                        let settle = self.config.set_address_settle_ms;
                        if elapsed(self.enumeration.since, now) < settle {
                            return;
                        }
                        self.control.result = None;
                        self.device.addr = self.config.device_address;
                        self.configure_control_pipe(self.device.addr);
                        debug!("USBH enum: device now at address {:#x}", self.device.addr);

                        let checked = validate_device_descriptor(
                            &self.descriptors.device,
                            self.device.speed,
                            &self.config,
                        );
                        match checked {
                            Ok(()) => self.enum_step(EnumState::GetFullDeviceDescriptor),
                            Err(err) => {
                                self.device.addr = 0;
                                self.enum_fail(err);
                            }
                        }
                    }
                    Some(result) => {
                        self.control.result = None;
                        self.device.addr = 0;
                        self.enum_fail(EnumError::ControlTransferFailed(result));
                    }
                }
            }

            EnumState::GetFullDeviceDescriptor => {
                self.request_descriptor(
                    DescriptorType::Device,
                    DEVICE_DESCRIPTOR_LEN as u16,
                    CepData::DeviceDescriptor,
                );
                self.enum_step(EnumState::WaitFullDeviceDescriptor);
            }
            EnumState::WaitFullDeviceDescriptor => match self.internal_result() {
                None => {}
                Some(ControlResult::Success) => {
                    let desc = self.descriptors.device_descriptor();
                    if desc.vendor_id() == PET_VENDOR_ID && desc.product_id() == PET_PRODUCT_ID {
                        debug!("USBH enum: PET device");
                        self.enum_step(EnumState::PetSetConfiguration);
                        return;
                    }
                    match validate_device_descriptor(
                        &self.descriptors.device,
                        self.device.speed,
                        &self.config,
                    ) {
                        Ok(()) => self.enum_step(EnumState::GetShortConfigDescriptor),
                        Err(err) => self.enum_fail(err),
                    }
                }
                Some(result) => self.enum_fail(EnumError::ControlTransferFailed(result)),
            },

            EnumState::GetShortConfigDescriptor => {
                self.request_descriptor(
                    DescriptorType::Configuration,
                    CONFIGURATION_DESCRIPTOR_LEN as u16,
                    CepData::ConfigDescriptor,
                );
                self.enum_step(EnumState::WaitShortConfigDescriptor);
            }
            EnumState::WaitShortConfigDescriptor => match self.internal_result() {
                None => {}
                Some(ControlResult::Success) => {
                    match validate_config_descriptor(&self.descriptors.config, &self.config) {
                        Ok(()) => self.enum_step(EnumState::GetFullConfigDescriptor),
                        Err(err) => self.enum_fail(err),
                    }
                }
                Some(result) => self.enum_fail(EnumError::ControlTransferFailed(result)),
            },

            EnumState::GetFullConfigDescriptor => {
                self.request_descriptor(
                    DescriptorType::Configuration,
                    self.descriptors.config.len() as u16,
                    CepData::ConfigDescriptor,
                );
                self.enum_step(EnumState::WaitFullConfigDescriptor);
            }
            EnumState::WaitFullConfigDescriptor => match self.internal_result() {
                None => {}
                Some(ControlResult::Success) => self.enum_step(EnumState::CheckClassSupport),
                Some(result) => self.enum_fail(EnumError::ControlTransferFailed(result)),
            },

            EnumState::PetSetConfiguration => {
                self.start_request(SetupPacket::set_configuration(1), CepData::None, true);
                self.enum_step(EnumState::PetWaitSetConfiguration);
            }
            EnumState::PetWaitSetConfiguration => match self.internal_result() {
                None => {}
                Some(ControlResult::Success) => self.enum_step(EnumState::CheckClassSupport),
                Some(result) => self.enum_fail(EnumError::ControlTransferFailed(result)),
            },

            EnumState::CheckClassSupport => {
                let class_id = self.class.as_ref().map(|class| class.class_id());
                match check_class_support(
                    &self.descriptors.config,
                    class_id,
                    self.device.class_assigned,
                ) {
                    Ok(()) => {
                        self.device.class_assigned = true;
                        self.enum_step(EnumState::Success);
                    }
                    Err(err) => self.enum_fail(err),
                }
            }
        }
    }
}
