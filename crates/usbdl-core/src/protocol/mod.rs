//! Protocol module - download mode wire definitions.

pub mod constants;
pub mod packet;

pub use constants::*;
pub use packet::{DownloadPacket, PacketError};
