//! Download packet framing.
//!
//! Wire layout (little endian):
//!
//! ```text
//! +----------+------------+-----------------+--------+
//! | reserved | total_size | payload (n)     | footer |
//! | u32 = 0  | u32        |                 | 2 x 00 |
//! +----------+------------+-----------------+--------+
//! ```
//!
//! `total_size` counts the header and footer as well, so it is always
//! `payload.len() + 10`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{FOOTER_SIZE, FRAMING_OVERHEAD, HEADER_SIZE};

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Cannot allocate {size} bytes for download packet")]
    Allocation { size: usize },
    #[error("Payload of {payload_len} bytes does not fit a 32-bit packet size")]
    TooLarge { payload_len: usize },
}

/// A framed payload, ready to be put on the bulk OUT endpoint.
///
/// The buffer is built once and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPacket {
    data: Vec<u8>,
}

impl DownloadPacket {
    /// Frame `payload` with the 8-byte header and the 2-byte footer.
    pub fn build(payload: &[u8]) -> Result<Self, PacketError> {
        let size = payload
            .len()
            .checked_add(FRAMING_OVERHEAD)
            .ok_or(PacketError::TooLarge {
                payload_len: payload.len(),
            })?;
        let total_size = u32::try_from(size).map_err(|_| PacketError::TooLarge {
            payload_len: payload.len(),
        })?;

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| PacketError::Allocation { size })?;

        // Writes into a Vec cannot fail.
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(total_size).unwrap();
        data.extend_from_slice(payload);
        data.resize(size, 0);

        Ok(Self { data })
    }

    /// Leading header word. Always zero for packets built by this crate.
    pub fn reserved(&self) -> u32 {
        self.header_word(0)
    }

    /// Total packet length as encoded in the header.
    pub fn total_size(&self) -> u32 {
        self.header_word(4)
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_SIZE..self.data.len() - FOOTER_SIZE]
    }

    pub fn footer(&self) -> &[u8] {
        &self.data[self.data.len() - FOOTER_SIZE..]
    }

    /// Full wire image, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// A packet always carries its framing, so it is never empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn header_word(&self, offset: usize) -> u32 {
        let mut cursor = Cursor::new(&self.data[offset..offset + 4]);
        // The header is always present.
        cursor.read_u32::<LittleEndian>().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_size_counts_framing() {
        for len in [0usize, 1, 501, 502, 503, 1000, 4096] {
            let payload = vec![0xA5; len];
            let packet = DownloadPacket::build(&payload).unwrap();
            assert_eq!(packet.total_size() as usize, len + 10);
            assert_eq!(packet.len(), len + 10);
        }
    }

    #[test]
    fn test_layout() {
        let packet = DownloadPacket::build(&[1, 2, 3, 4]).unwrap();
        assert_eq!(
            packet.as_bytes(),
            &[0, 0, 0, 0, 14, 0, 0, 0, 1, 2, 3, 4, 0, 0]
        );
        assert_eq!(packet.reserved(), 0);
        assert_eq!(packet.payload(), &[1, 2, 3, 4]);
        assert_eq!(packet.footer(), &[0, 0]);
    }

    #[test]
    fn test_footer_stays_zero_after_nonzero_payload() {
        let packet = DownloadPacket::build(&[0xFF; 33]).unwrap();
        assert_eq!(packet.footer(), &[0, 0]);
        assert!(packet.payload().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_empty_payload() {
        let packet = DownloadPacket::build(&[]).unwrap();
        assert_eq!(packet.total_size(), 10);
        assert!(packet.payload().is_empty());
        assert!(!packet.is_empty());
    }

    #[test]
    fn test_size_field_is_little_endian() {
        let packet = DownloadPacket::build(&vec![0u8; 0x1234]).unwrap();
        assert_eq!(&packet.as_bytes()[4..8], &[0x3E, 0x12, 0x00, 0x00]);
    }
}
