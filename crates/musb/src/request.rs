//! The 8-byte SETUP packet and the standard request codes of USB 2.0 9.4.

use byteorder::{ByteOrder, LittleEndian};

use crate::descriptors::DescriptorType;
use crate::types::UsbDirection;

pub const SETUP_PKT_LEN: usize = 8;

/// LangID used when asking for string descriptors (English, United States).
pub const LANGID_EN_US: u16 = 0x0409;

/// Standard request codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdRequest {
    GetStatus = 0,
    ClearFeature = 1,
    SetFeature = 3,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
    GetInterface = 10,
    SetInterface = 11,
    SynchFrame = 12,
}

impl StdRequest {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => StdRequest::GetStatus,
            1 => StdRequest::ClearFeature,
            3 => StdRequest::SetFeature,
            5 => StdRequest::SetAddress,
            6 => StdRequest::GetDescriptor,
            7 => StdRequest::SetDescriptor,
            8 => StdRequest::GetConfiguration,
            9 => StdRequest::SetConfiguration,
            10 => StdRequest::GetInterface,
            11 => StdRequest::SetInterface,
            12 => StdRequest::SynchFrame,
            _ => return None,
        })
    }
}

/// Bits 6..5 of bmRequestType.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Bits 4..0 of bmRequestType.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Standard feature selectors.
pub const FEATURE_ENDPOINT_HALT: u16 = 0;
pub const FEATURE_REMOTE_WAKEUP: u16 = 1;
pub const FEATURE_TEST_MODE: u16 = 2;

/// A decoded SETUP packet. Multi-byte fields are little-endian on the wire.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

unsafe impl bytemuck::Zeroable for SetupPacket {}
unsafe impl bytemuck::Pod for SetupPacket {}

impl SetupPacket {
    pub fn new(
        dir: UsbDirection,
        kind: RequestKind,
        recipient: Recipient,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Self {
        let kind_bits = match kind {
            RequestKind::Standard => 0,
            RequestKind::Class => 1,
            RequestKind::Vendor => 2,
            RequestKind::Reserved => 3,
        };
        let recipient_bits = match recipient {
            Recipient::Device => 0,
            Recipient::Interface => 1,
            Recipient::Endpoint => 2,
            Recipient::Other => 3,
        };
        Self {
            request_type: (dir as u8) << 7 | kind_bits << 5 | recipient_bits,
            request,
            value,
            index,
            length,
        }
    }

    pub fn from_bytes(bytes: &[u8; SETUP_PKT_LEN]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: LittleEndian::read_u16(&bytes[2..4]),
            index: LittleEndian::read_u16(&bytes[4..6]),
            length: LittleEndian::read_u16(&bytes[6..8]),
        }
    }

    pub fn to_bytes(&self) -> [u8; SETUP_PKT_LEN] {
        let mut bytes = [0u8; SETUP_PKT_LEN];
        bytes[0] = self.request_type;
        bytes[1] = self.request;
        LittleEndian::write_u16(&mut bytes[2..4], self.value);
        LittleEndian::write_u16(&mut bytes[4..6], self.index);
        LittleEndian::write_u16(&mut bytes[6..8], self.length);
        bytes
    }

    pub fn direction(&self) -> UsbDirection {
        UsbDirection::from_request_type(self.request_type)
    }

    pub fn kind(&self) -> RequestKind {
        match (self.request_type >> 5) & 0x3 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self.request_type & 0x1f {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            _ => Recipient::Other,
        }
    }

    pub fn std_request(&self) -> Option<StdRequest> {
        StdRequest::from_u8(self.request)
    }

    /// Descriptor type in the high byte of wValue.
    pub fn descriptor_type(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// Descriptor index in the low byte of wValue.
    pub fn descriptor_index(&self) -> u8 {
        self.value as u8
    }

    pub fn set_address(addr: u8) -> Self {
        Self::new(
            UsbDirection::Out,
            RequestKind::Standard,
            Recipient::Device,
            StdRequest::SetAddress as u8,
            addr as u16,
            0,
            0,
        )
    }

    pub fn set_configuration(value: u8) -> Self {
        Self::new(
            UsbDirection::Out,
            RequestKind::Standard,
            Recipient::Device,
            StdRequest::SetConfiguration as u8,
            value as u16,
            0,
            0,
        )
    }
}

/// Builds a GET_DESCRIPTOR request. String descriptors are requested in
/// [`LANGID_EN_US`].
pub fn construct_get_descriptor_command(
    kind: RequestKind,
    recipient: Recipient,
    desc_type: DescriptorType,
    index: u8,
    length: u16,
) -> SetupPacket {
    let lang = if desc_type == DescriptorType::String {
        LANGID_EN_US
    } else {
        0
    };
    SetupPacket::new(
        UsbDirection::In,
        kind,
        recipient,
        StdRequest::GetDescriptor as u8,
        (desc_type as u16) << 8 | index as u16,
        lang,
        length,
    )
}
