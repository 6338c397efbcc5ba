//! Best-effort response draining.
//!
//! After a payload starts running it may stream data back on the bulk IN
//! endpoint. The device side is not reliable here, so every read outcome is
//! accepted as-is: data is copied to the sink, and the first read that yields
//! nothing (a zero-length packet, a timeout or any transport error) ends the
//! drain.

use std::io::{self, Write};
use std::time::Duration;

use tracing::{debug, instrument};

use crate::device::DeviceSession;
use crate::events::{DownloadEvent, DownloadObserver, NullObserver};
use crate::protocol::constants::{BLOCK_SIZE, RESPONSE_READ_TIMEOUT};
use crate::transport::UsbTransport;

/// Outcome of a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectReport {
    pub bytes_written: u64,
    pub read_calls: usize,
}

pub struct ResponseCollector<'a> {
    block_size: usize,
    timeout: Duration,
    observer: &'a dyn DownloadObserver,
}

impl<'a> ResponseCollector<'a> {
    pub fn new(observer: &'a dyn DownloadObserver) -> Self {
        Self {
            block_size: BLOCK_SIZE,
            timeout: RESPONSE_READ_TIMEOUT,
            observer,
        }
    }

    /// Override the per-read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drain the response stream into `sink`.
    ///
    /// Only sink write failures are reported; transport errors end the drain.
    #[instrument(skip_all)]
    pub fn collect<T: UsbTransport, W: Write>(
        &self,
        session: &DeviceSession<T>,
        sink: &mut W,
    ) -> io::Result<CollectReport> {
        let mut buf = vec![0u8; self.block_size];
        let mut bytes_written = 0u64;
        let mut read_calls = 0usize;

        loop {
            let n = match session.read_block(&mut buf, self.timeout) {
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "Response read ended");
                    0
                }
            };
            read_calls += 1;

            sink.write_all(&buf[..n])?;
            bytes_written += n as u64;

            if n == 0 {
                break;
            }
            self.observer
                .on_event(&DownloadEvent::ResponseReceived { length: n });
        }

        sink.flush()?;
        debug!(bytes_written, read_calls, "Response drained");
        Ok(CollectReport {
            bytes_written,
            read_calls,
        })
    }
}

impl Default for ResponseCollector<'static> {
    fn default() -> Self {
        Self::new(&NullObserver)
    }
}
