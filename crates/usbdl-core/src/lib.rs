//! usbdl-core: Exynos USB download mode protocol implementation in Rust.
//!
//! Boot ROMs of several Exynos SoCs expose a vendor bulk protocol while in
//! download mode. This crate frames a payload for that protocol, sends it in
//! bulk-sized chunks and optionally drains whatever the payload streams back.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants and packet framing
//! - **Target**: Catalog of known SoCs keyed by USB product string
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Device**: Scoped device session (claim, release, close)
//! - **Transmit / Collect**: Chunked upload and best-effort response drain
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator and configuration
//!
//! # Example
//!
//! ```no_run
//! use usbdl_core::session::{SessionConfig, UsbdlSession};
//!
//! let config = SessionConfig {
//!     input_path: Some("payload.bin".to_string()),
//!     ..Default::default()
//! };
//!
//! let session = UsbdlSession::new(config);
//! session.run().expect("download failed");
//! ```

pub mod collect;
pub mod device;
pub mod events;
pub mod protocol;
pub mod session;
pub mod target;
pub mod transmit;
pub mod transport;

// Re-exports for convenience
pub use collect::{CollectReport, ResponseCollector};
pub use device::{DeviceSession, SessionState};
pub use events::{DownloadEvent, DownloadObserver, DownloadPhase, NullObserver, TracingObserver};
pub use protocol::{DownloadPacket, PacketError};
pub use session::{RunReport, SessionConfig, UsbdlSession};
pub use target::{Target, TargetInfo};
pub use transmit::{ChunkedTransmitter, TransmitError, TransmitReport};
pub use transport::{MockTransport, NusbTransport, TransportError, UsbTransport};
