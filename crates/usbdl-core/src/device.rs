//! Device session: scoped ownership of one opened download-mode device.
//!
//! Lifecycle:
//!
//! ```text
//! Opened -> InterfaceClaimed -> InterfaceReleased -> Closed
//! ```
//!
//! `release_interface` and `close` are idempotent, and `Drop` runs both, so
//! a session that goes out of scope on an error path still tears the device
//! down exactly once.

use std::time::Duration;

use tracing::debug;

use crate::protocol::constants::{BULK_IN_ENDPOINT, BULK_OUT_ENDPOINT};
use crate::target::Target;
use crate::transport::{TransportError, UsbTransport};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opened,
    InterfaceClaimed { interface: u8 },
    InterfaceReleased,
    Closed,
}

pub struct DeviceSession<T: UsbTransport> {
    transport: T,
    state: SessionState,
}

impl<T: UsbTransport> DeviceSession<T> {
    /// Take ownership of an opened transport.
    pub fn new(transport: T) -> Self {
        debug!(
            vid = %format!("{:04X}", transport.vendor_id()),
            pid = %format!("{:04X}", transport.product_id()),
            "Device opened"
        );
        Self {
            transport,
            state: SessionState::Opened,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn product_string(&self) -> Option<String> {
        self.transport.product_string()
    }

    /// Resolve the connected target from its product string.
    ///
    /// Returns `None` when the descriptor is missing or unknown.
    pub fn identify(&self) -> Option<Target> {
        self.product_string()
            .as_deref()
            .and_then(Target::identify)
    }

    pub fn claim_interface(
        &mut self,
        interface: u8,
        detach_kernel_driver: bool,
    ) -> Result<(), TransportError> {
        match self.state {
            SessionState::InterfaceClaimed { interface: current } if current == interface => {
                return Ok(());
            }
            SessionState::Closed => {
                return Err(TransportError::OpenFailed("device already closed".into()));
            }
            _ => {}
        }
        self.transport
            .claim_interface(interface, detach_kernel_driver)?;
        self.state = SessionState::InterfaceClaimed { interface };
        Ok(())
    }

    pub fn release_interface(&mut self) {
        if let SessionState::InterfaceClaimed { interface } = self.state {
            self.transport.release_interface();
            self.state = SessionState::InterfaceReleased;
            debug!(interface, "Interface released");
        }
    }

    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.release_interface();
        self.transport.close();
        self.state = SessionState::Closed;
        debug!("Device closed");
    }

    /// One bulk OUT transfer on the download endpoint.
    pub fn write_block(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.ensure_claimed()?;
        self.transport.bulk_write(BULK_OUT_ENDPOINT, data)
    }

    /// One bulk IN transfer on the response endpoint.
    pub fn read_block(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.ensure_claimed()?;
        self.transport.bulk_read(BULK_IN_ENDPOINT, buf, timeout)
    }

    fn ensure_claimed(&self) -> Result<(), TransportError> {
        match self.state {
            SessionState::InterfaceClaimed { .. } => Ok(()),
            _ => Err(TransportError::InterfaceNotClaimed),
        }
    }
}

impl<T: UsbTransport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}
