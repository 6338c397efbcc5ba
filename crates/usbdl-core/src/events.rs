//! Event system for UI decoupling.
//!
//! Lets a front-end follow a download without the core knowing how the
//! progress is displayed.

use std::fmt;

use crate::target::Target;

/// Download phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    /// Reading and framing the payload.
    Preparing,
    /// Opening and claiming the device.
    Connecting,
    /// Sending the framed packet.
    Transmitting,
    /// Draining the response stream.
    Collecting,
    /// Waiting for the device before teardown.
    Settling,
    /// All operations complete.
    Complete,
}

impl fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadPhase::Preparing => write!(f, "Preparing"),
            DownloadPhase::Connecting => write!(f, "Connecting"),
            DownloadPhase::Transmitting => write!(f, "Transmitting"),
            DownloadPhase::Collecting => write!(f, "Collecting"),
            DownloadPhase::Settling => write!(f, "Settling"),
            DownloadPhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Events emitted during a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// Phase changed.
    PhaseChanged { phase: DownloadPhase },
    /// Device opened.
    DeviceOpened { vid: u16, pid: u16 },
    /// Product string matched a catalog entry.
    TargetIdentified { target: Target },
    /// Product string missing or not in the catalog.
    TargetUnknown { product: Option<String> },
    /// One bulk write finished.
    ChunkSent { requested: usize, transferred: usize },
    /// Transmit progress.
    Progress { sent: u64, total: u64 },
    /// Bytes drained from the response endpoint.
    ResponseReceived { length: usize },
    /// All operations completed successfully.
    Complete,
}

/// Observer trait for receiving download events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DownloadObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DownloadEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DownloadObserver for NullObserver {
    fn on_event(&self, _event: &DownloadEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DownloadObserver for TracingObserver {
    fn on_event(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::PhaseChanged { phase } => {
                tracing::debug!(phase = %phase, "Phase changed");
            }
            DownloadEvent::DeviceOpened { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Device connected");
            }
            DownloadEvent::TargetIdentified { target } => {
                tracing::info!(
                    soc = %target,
                    transfer_buffer = %format!("0x{:08X}", target.transfer_buffer_address()),
                    return_address_ptr = %format!("0x{:08X}", target.return_address_pointer()),
                    "Target identified"
                );
            }
            DownloadEvent::TargetUnknown { product } => {
                tracing::warn!(product = ?product, "Unknown target, continuing anyway");
            }
            DownloadEvent::ChunkSent {
                requested,
                transferred,
            } => {
                tracing::trace!(requested, transferred, "Bulk write");
            }
            DownloadEvent::Progress { sent, total } => {
                let pct = if *total > 0 { (*sent * 100) / *total } else { 0 };
                tracing::debug!(sent, total, progress = %format!("{}%", pct), "Progress");
            }
            DownloadEvent::ResponseReceived { length } => {
                tracing::trace!(length, "Response data");
            }
            DownloadEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}
