//! Chunked packet transmission.
//!
//! The packet goes out as a sequence of bulk writes of at most
//! [`BLOCK_SIZE`] bytes. A write may be accepted only partially; the cursor
//! advances by what the device actually took, and the next write starts
//! from there.

use thiserror::Error;
use tracing::{debug, instrument};

use crate::device::DeviceSession;
use crate::events::{DownloadEvent, DownloadObserver, NullObserver};
use crate::protocol::DownloadPacket;
use crate::protocol::constants::BLOCK_SIZE;
use crate::transport::{TransportError, UsbTransport};

#[derive(Error, Debug)]
pub enum TransmitError {
    #[error("Bulk transfer failed at offset {offset}: {source}")]
    Transport {
        offset: usize,
        #[source]
        source: TransportError,
    },

    /// The transport claimed to move more bytes than were handed to it.
    #[error(
        "Transfer accounting broken at offset {offset}: {transferred} bytes reported for a {requested}-byte write"
    )]
    Overrun {
        offset: usize,
        requested: usize,
        transferred: usize,
    },
}

/// Outcome of a completed transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitReport {
    pub bytes_sent: usize,
    pub write_calls: usize,
}

pub struct ChunkedTransmitter<'a> {
    block_size: usize,
    observer: &'a dyn DownloadObserver,
}

impl<'a> ChunkedTransmitter<'a> {
    pub fn new(observer: &'a dyn DownloadObserver) -> Self {
        Self {
            block_size: BLOCK_SIZE,
            observer,
        }
    }

    /// Send the whole packet, failing on the first transport error.
    #[instrument(skip_all, fields(total = packet.len()))]
    pub fn send<T: UsbTransport>(
        &self,
        session: &DeviceSession<T>,
        packet: &DownloadPacket,
    ) -> Result<TransmitReport, TransmitError> {
        let bytes = packet.as_bytes();
        let total = bytes.len();
        let mut offset = 0usize;
        let mut remaining = total;
        let mut write_calls = 0usize;

        while remaining > 0 {
            let requested = remaining.min(self.block_size);
            let transferred = session
                .write_block(&bytes[offset..offset + requested])
                .map_err(|source| TransmitError::Transport { offset, source })?;
            write_calls += 1;

            if transferred > requested {
                return Err(TransmitError::Overrun {
                    offset,
                    requested,
                    transferred,
                });
            }
            debug!(offset, requested, transferred, "Bulk write");

            offset += transferred;
            remaining -= transferred;

            self.observer.on_event(&DownloadEvent::ChunkSent {
                requested,
                transferred,
            });
            self.observer.on_event(&DownloadEvent::Progress {
                sent: offset as u64,
                total: total as u64,
            });
        }

        Ok(TransmitReport {
            bytes_sent: offset,
            write_calls,
        })
    }
}

impl Default for ChunkedTransmitter<'static> {
    fn default() -> Self {
        Self::new(&NullObserver)
    }
}
