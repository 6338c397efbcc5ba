//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for USB communication,
//! allowing different implementations (nusb, mock, etc.).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to initialise USB: {0}")]
    UsbInit(String),

    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Interface {interface} is busy")]
    InterfaceBusy { interface: u8 },

    #[error("Permission denied claiming interface {interface}")]
    PermissionDenied { interface: u8 },

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Interface not claimed")]
    InterfaceNotClaimed,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Abstract USB transport interface.
///
/// An implementation owns one opened device. Bulk operations are only valid
/// between a successful `claim_interface` and `release_interface`.
///
/// This trait enables:
/// - Production implementation using nusb
/// - Mock implementation for unit testing
pub trait UsbTransport {
    /// USB product string descriptor, if the device reported a readable one.
    fn product_string(&self) -> Option<String>;

    /// Claim an interface, optionally detaching a kernel driver bound to it.
    fn claim_interface(
        &mut self,
        interface: u8,
        detach_kernel_driver: bool,
    ) -> Result<(), TransportError>;

    /// Release the claimed interface. Must be safe to call repeatedly.
    fn release_interface(&mut self);

    /// Close the device handle. Must be safe to call repeatedly.
    fn close(&mut self);

    /// Write `data` to a bulk OUT endpoint, blocking until the transfer
    /// completes. Returns the number of bytes the device accepted.
    fn bulk_write(&self, endpoint: u8, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `buf.len()` bytes from a bulk IN endpoint.
    fn bulk_read(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Get the VID of the opened device.
    fn vendor_id(&self) -> u16;

    /// Get the PID of the opened device.
    fn product_id(&self) -> u16;
}
