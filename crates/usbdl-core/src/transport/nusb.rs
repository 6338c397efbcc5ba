//! nusb-based USB transport implementation.

use std::sync::Mutex;
use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, In, Out, TransferError};
use nusb::{Device, ErrorKind, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{TransportError, UsbTransport};

/// Poll interval while waiting on a transfer that has no deadline.
const WAIT_SLICE: Duration = Duration::from_secs(1);
/// How long to wait for a cancelled transfer to be handed back.
const CANCEL_TIMEOUT: Duration = Duration::from_millis(100);

/// nusb-based USB transport.
pub struct NusbTransport {
    device: Option<Device>,
    interface: Option<Interface>,
    product: Option<String>,
    /// IN data received beyond what the last caller's buffer could hold.
    overflow: Mutex<Vec<u8>>,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open the first device matching `vid`/`pid`.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::UsbInit(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        let product = device_info.product_string().map(str::to_owned);

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            product = ?product,
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        Ok(Self {
            device: Some(device),
            interface: None,
            product,
            overflow: Mutex::new(Vec::new()),
            vid,
            pid,
        })
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface
            .as_ref()
            .ok_or(TransportError::InterfaceNotClaimed)
    }
}

impl NusbTransport {
    fn lock_overflow(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.overflow
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Length of an IN request able to hold `len` bytes.
///
/// IN requests must be a whole number of max-size packets.
fn in_request_len(len: usize, max_packet_size: usize) -> usize {
    let mps = max_packet_size.max(1);
    len.div_ceil(mps) * mps
}

/// Copy a completed IN transfer into `buf`, keeping what does not fit.
fn split_completion(received: &[u8], buf: &mut [u8], overflow: &mut Vec<u8>) -> usize {
    let n = received.len().min(buf.len());
    buf[..n].copy_from_slice(&received[..n]);
    if received.len() > n {
        debug!(kept = received.len() - n, "Read larger than buffer");
        overflow.extend_from_slice(&received[n..]);
    }
    n
}

/// Serve a read from data left over by an earlier oversized transfer.
fn drain_overflow(overflow: &mut Vec<u8>, buf: &mut [u8]) -> usize {
    let n = overflow.len().min(buf.len());
    buf[..n].copy_from_slice(&overflow[..n]);
    overflow.drain(..n);
    n
}

impl UsbTransport for NusbTransport {
    fn product_string(&self) -> Option<String> {
        self.product.clone()
    }

    #[instrument(skip(self))]
    fn claim_interface(
        &mut self,
        interface: u8,
        detach_kernel_driver: bool,
    ) -> Result<(), TransportError> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| TransportError::OpenFailed("device already closed".into()))?;

        let claimed = if detach_kernel_driver {
            device.detach_and_claim_interface(interface).wait()
        } else {
            device.claim_interface(interface).wait()
        };

        let claimed = claimed.map_err(|e| match e.kind() {
            ErrorKind::Busy => TransportError::InterfaceBusy { interface },
            ErrorKind::PermissionDenied => TransportError::PermissionDenied { interface },
            ErrorKind::Disconnected => TransportError::Disconnected,
            _ => TransportError::ClaimInterfaceFailed {
                interface,
                message: e.to_string(),
            },
        })?;

        info!(interface, "Interface claimed");
        self.interface = Some(claimed);
        Ok(())
    }

    fn release_interface(&mut self) {
        // Dropping the handle releases the interface.
        self.lock_overflow().clear();
        if self.interface.take().is_some() {
            debug!("Interface released");
        }
    }

    fn close(&mut self) {
        self.release_interface();
        if self.device.take().is_some() {
            debug!("Device closed");
        }
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn bulk_write(&self, endpoint: u8, data: &[u8]) -> Result<usize, TransportError> {
        let mut ep = self
            .interface()?
            .endpoint::<Bulk, Out>(endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        ep.submit(Buffer::from(data.to_vec()));

        // No deadline: keep waiting until the host controller hands it back.
        let completion = loop {
            if let Some(completion) = ep.wait_next_complete(WAIT_SLICE) {
                break completion;
            }
        };

        match completion.status {
            Ok(()) => {
                debug!(bytes_written = completion.actual_len, "Write complete");
                Ok(completion.actual_len)
            }
            Err(TransferError::Disconnected) => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::WriteFailed(format!("{e:?}: {e}"))),
        }
    }

    #[instrument(skip(self, buf), fields(max_len = buf.len()))]
    fn bulk_read(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let mut ep = self
            .interface()?
            .endpoint::<Bulk, In>(endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let buffered = drain_overflow(&mut self.lock_overflow(), buf);
        if buffered > 0 {
            debug!(bytes_read = buffered, "Read served from overflow");
            return Ok(buffered);
        }

        let len = in_request_len(buf.len(), ep.max_packet_size());
        let mut request = Buffer::new(len);
        request.set_requested_len(len);
        ep.submit(request);

        let completion = match ep.wait_next_complete(timeout) {
            Some(completion) => completion,
            None => {
                ep.cancel_all();
                match ep.wait_next_complete(CANCEL_TIMEOUT) {
                    Some(completion) => completion,
                    None => {
                        warn!("Cancelled read was not returned");
                        return Err(TransportError::Timeout {
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                }
            }
        };

        let n = split_completion(&completion.buffer, buf, &mut self.lock_overflow());

        match completion.status {
            Ok(()) => {
                debug!(bytes_read = n, "Read complete");
                Ok(n)
            }
            // Data that arrived before the deadline is still valid.
            Err(TransferError::Cancelled) if n > 0 => Ok(n),
            Err(TransferError::Cancelled) => Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(TransferError::Disconnected) => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::ReadFailed(format!("{e:?}: {e}"))),
        }
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

impl Drop for NusbTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_request_len() {
        assert_eq!(in_request_len(512, 64), 512);
        assert_eq!(in_request_len(512, 512), 512);
        assert_eq!(in_request_len(512, 1024), 1024);
        assert_eq!(in_request_len(100, 64), 128);
        assert_eq!(in_request_len(8, 0), 8);
    }

    #[test]
    fn test_oversized_completion_is_not_lost() {
        // A 1024-byte SuperSpeed packet drained through 512-byte reads.
        let received: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
        let mut overflow = Vec::new();
        let mut buf = [0u8; 512];

        assert_eq!(split_completion(&received, &mut buf, &mut overflow), 512);
        assert_eq!(&buf[..], &received[..512]);
        assert_eq!(overflow.len(), 512);

        assert_eq!(drain_overflow(&mut overflow, &mut buf), 512);
        assert_eq!(&buf[..], &received[512..]);
        assert!(overflow.is_empty());
        assert_eq!(drain_overflow(&mut overflow, &mut buf), 0);
    }

    #[test]
    fn test_overflow_drains_across_small_reads() {
        let mut overflow = b"abcdef".to_vec();
        let mut buf = [0u8; 4];
        assert_eq!(drain_overflow(&mut overflow, &mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(drain_overflow(&mut overflow, &mut buf), 2);
        assert_eq!(&buf[..2], b"ef");
    }
}
