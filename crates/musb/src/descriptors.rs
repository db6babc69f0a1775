//! Standard descriptors defined in 9.6 of the USB 2.0 manual.
//!
//! The structs mirror the wire layout byte for byte, so they can be read
//! straight out of a received buffer with `bytemuck`. Multi-byte fields keep
//! their little-endian wire encoding; use the accessor methods.

pub const DEVICE_DESCRIPTOR_LEN: usize = 18;
pub const CONFIGURATION_DESCRIPTOR_LEN: usize = 9;
pub const INTERFACE_DESCRIPTOR_LEN: usize = 9;

pub const BCD_USB_1_0: u16 = 0x0100;
pub const BCD_USB_1_1: u16 = 0x0110;
pub const BCD_USB_2_0: u16 = 0x0200;
pub const BCD_USB_2_1: u16 = 0x0210;

pub const CLASS_HUB: u8 = 0x09;

#[repr(u8)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    #[default]
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
    Hid = 33,
    HidReport = 34,
    HidPhysical = 35,
    Hub = 41,
}

impl DescriptorType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => DescriptorType::Device,
            2 => DescriptorType::Configuration,
            3 => DescriptorType::String,
            4 => DescriptorType::Interface,
            5 => DescriptorType::Endpoint,
            6 => DescriptorType::DeviceQualifier,
            7 => DescriptorType::OtherSpeedConfiguration,
            8 => DescriptorType::InterfacePower,
            33 => DescriptorType::Hid,
            34 => DescriptorType::HidReport,
            35 => DescriptorType::HidPhysical,
            41 => DescriptorType::Hub,
            _ => return None,
        })
    }
}

#[repr(C, packed)]
#[derive(Default, Debug, Clone, Copy)]
pub struct UsbDeviceDescriptor {
    pub descriptor_length: u8,
    pub descriptor_type: u8,
    usb_version: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet_size0: u8,
    vendor_id: u16,
    product_id: u16,
    version: u16,
    pub manufacturer: u8,
    pub product: u8,
    pub serial_number: u8,
    pub configuration_count: u8,
}

unsafe impl bytemuck::Zeroable for UsbDeviceDescriptor {}
unsafe impl bytemuck::Pod for UsbDeviceDescriptor {}

impl UsbDeviceDescriptor {
    /// Reads a descriptor from the start of `bytes`; missing trailing bytes
    /// read as zero, so a short (8-byte) read yields a partial descriptor.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut raw = [0u8; DEVICE_DESCRIPTOR_LEN];
        let n = bytes.len().min(DEVICE_DESCRIPTOR_LEN);
        raw[..n].copy_from_slice(&bytes[..n]);
        bytemuck::pod_read_unaligned(&raw)
    }

    pub fn usb_version(&self) -> u16 {
        u16::from_le(self.usb_version)
    }

    pub fn vendor_id(&self) -> u16 {
        u16::from_le(self.vendor_id)
    }

    pub fn product_id(&self) -> u16 {
        u16::from_le(self.product_id)
    }

    pub fn version(&self) -> u16 {
        u16::from_le(self.version)
    }
}

#[repr(C, packed)]
#[derive(Default, Debug, Clone, Copy)]
pub struct UsbConfigurationDescriptor {
    pub descriptor_length: u8,
    pub descriptor_type: u8,
    total_length: u16,
    pub interface_count: u8,
    pub configuration_value: u8,
    pub string_index: u8,
    pub attributes: u8,
    /// In units of 2 mA.
    pub maximum_power: u8,
}

unsafe impl bytemuck::Zeroable for UsbConfigurationDescriptor {}
unsafe impl bytemuck::Pod for UsbConfigurationDescriptor {}

impl UsbConfigurationDescriptor {
    pub fn parse(bytes: &[u8]) -> Self {
        let mut raw = [0u8; CONFIGURATION_DESCRIPTOR_LEN];
        let n = bytes.len().min(CONFIGURATION_DESCRIPTOR_LEN);
        raw[..n].copy_from_slice(&bytes[..n]);
        bytemuck::pod_read_unaligned(&raw)
    }

    pub fn total_length(&self) -> u16 {
        u16::from_le(self.total_length)
    }
}

#[repr(C, packed)]
#[derive(Default, Debug, Clone, Copy)]
pub struct UsbInterfaceDescriptor {
    pub descriptor_length: u8,
    pub descriptor_type: u8,
    pub number: u8,
    pub alternate_setting: u8,
    pub endpoint_count: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub string_index: u8,
}

unsafe impl bytemuck::Zeroable for UsbInterfaceDescriptor {}
unsafe impl bytemuck::Pod for UsbInterfaceDescriptor {}

impl UsbInterfaceDescriptor {
    pub fn parse(bytes: &[u8]) -> Self {
        let mut raw = [0u8; INTERFACE_DESCRIPTOR_LEN];
        let n = bytes.len().min(INTERFACE_DESCRIPTOR_LEN);
        raw[..n].copy_from_slice(&bytes[..n]);
        bytemuck::pod_read_unaligned(&raw)
    }

    /// The 24-bit class identifier `class << 16 | subclass << 8 | protocol`
    /// used to match class drivers.
    pub fn class_id(&self) -> u32 {
        (self.class as u32) << 16 | (self.subclass as u32) << 8 | self.protocol as u32
    }
}
