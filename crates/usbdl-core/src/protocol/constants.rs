//! Exynos USB download mode constants.

use std::time::Duration;

/// Vendor ID exposed by the boot ROM in download mode.
pub const EXYNOS_VENDOR_ID: u16 = 0x18D1;
/// Product ID exposed by the boot ROM in download mode.
pub const EXYNOS_PRODUCT_ID: u16 = 0x4F00;
/// Interface carrying both bulk endpoints.
pub const DOWNLOAD_INTERFACE: u8 = 0;

/// Bulk OUT endpoint the packet is written to.
pub const BULK_OUT_ENDPOINT: u8 = 0x02;
/// Bulk IN endpoint the device streams responses on.
pub const BULK_IN_ENDPOINT: u8 = 0x81;

/// Largest chunk handed to a single bulk transfer.
pub const BLOCK_SIZE: usize = 512;

/// Largest single-call transfer the boot ROM is known to address.
/// Not used by the transmit path, which always works in `BLOCK_SIZE` chunks.
pub const CHUNK_SIZE: u32 = 0x00FF_FE00;

/// Header: reserved word + total size word.
pub const HEADER_SIZE: usize = 8;
/// Zero-filled trailer after the payload.
pub const FOOTER_SIZE: usize = 2;
/// Bytes added around the payload by framing.
pub const FRAMING_OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// Per-read timeout while draining the response stream.
pub const RESPONSE_READ_TIMEOUT: Duration = Duration::from_millis(10);
/// Delay between the end of transmission and interface release.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);
