#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

#[cfg(test)]
mod tests;

pub mod buffer;
pub mod config;
pub mod descriptors;
pub mod device;
pub mod dma;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod host;
pub mod irq;
pub mod regs;
pub mod request;
pub mod timer;
pub mod transfer;
pub mod types;

pub use buffer::Buffer;
pub use config::{DeviceConfig, EndpointConfig, HostConfig};
pub use device::{DeviceClassDriver, DeviceController};
pub use error::{Error, Result};
pub use host::{HostClassDriver, HostController, HostEvents};
pub use regs::UsbCore;
pub use types::{EpStatus, PipeDir, TransferType, UsbSpeed};

/// Number of endpoint slots per direction, including the control endpoint.
pub const MAX_ENDPOINTS: usize = 5;

/// Number of DMA channels in the core.
pub const DMA_CHANNELS: usize = 4;
