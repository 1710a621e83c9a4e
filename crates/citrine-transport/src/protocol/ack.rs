//! The acknowledgement wire record.

use bytes::{Bytes, BytesMut};
use citrine_binary::{BinaryError, BinaryReader, BinaryWriter};

/// Size of an acknowledgement datagram on the wire.
pub const ACK_FRAME_LEN: usize = 12;

/// A cumulative acknowledgement: "all sequence numbers ≤ `value` arrived
/// contiguously". The value is written three times so a corrupted record is
/// detectable without a checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    pub value: u32,
}

impl AckFrame {
    pub fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(ACK_FRAME_LEN);
        frame.write_u32_be(self.value);
        frame.write_u32_be(self.value);
        frame.write_u32_be(self.value);
        frame.freeze()
    }

    /// Rejects records that are short or whose three copies disagree.
    pub fn decode(frame: &[u8]) -> Result<Self, BinaryError> {
        if frame.len() < ACK_FRAME_LEN {
            return Err(BinaryError::UnexpectedEof {
                needed: ACK_FRAME_LEN,
                remaining: frame.len(),
            });
        }
        let mut reader = frame;
        let first = reader.read_u32_be()?;
        let second = reader.read_u32_be()?;
        let third = reader.read_u32_be()?;
        if first != second || second != third {
            return Err(BinaryError::InvalidData(format!(
                "acknowledgement copies disagree: {first}, {second}, {third}"
            )));
        }
        Ok(Self { value: first })
    }
}
