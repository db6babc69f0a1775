use core::result::Result as CoreResult;

use crate::types::PipeDir;

/// Errors returned by the controller API.
///
/// These report misuse of the API or resource conflicts. Outcomes of bus
/// transactions are never returned here; they arrive as an
/// [`EpStatus`](crate::types::EpStatus) on the completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // endpoint number outside the core's endpoint slots, or endpoint 0 where
    // a data endpoint is required
    InvalidEndpoint(u8),
    // max packet size larger than the FIFO or the speed/type limit
    InvalidPacketSize,
    // FIFO size is zero or not a multiple of 8
    InvalidFifo,
    // channel number outside the DMA engine
    InvalidDmaChannel(u8),
    // channel already owns another endpoint+direction
    DmaChannelBusy { channel: u8, ep: u8, dir: PipeDir },
    // a transfer is still in flight on this pipe
    PipeBusy,
    NotConfigured,
    // receive attempted into a buffer created from a shared slice
    BufferNotWritable,
    BufferTooSmall,
    NotAttached,
    // the request is not valid in the current device/host state
    InvalidState,
    // polling/NAK interval that cannot be encoded
    InvalidInterval(u32),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidEndpoint(ep) => write!(f, "invalid endpoint {}", ep),
            Error::InvalidPacketSize => write!(f, "max packet size does not fit"),
            Error::InvalidFifo => write!(f, "invalid FIFO geometry"),
            Error::InvalidDmaChannel(ch) => write!(f, "invalid DMA channel {}", ch),
            Error::DmaChannelBusy { channel, ep, dir } => write!(
                f,
                "DMA channel {} already bound to endpoint {} {:?}",
                channel, ep, dir
            ),
            Error::PipeBusy => write!(f, "pipe busy"),
            Error::NotConfigured => write!(f, "endpoint not configured"),
            Error::BufferNotWritable => write!(f, "buffer is not writable"),
            Error::BufferTooSmall => write!(f, "buffer too small"),
            Error::NotAttached => write!(f, "no device attached"),
            Error::InvalidState => write!(f, "invalid state for request"),
            Error::InvalidInterval(i) => write!(f, "invalid interval {}", i),
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = CoreResult<T, Error>;
