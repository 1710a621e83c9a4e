//! Framing of data packets: header, flags, payload and corruption detection.

use bytes::{Bytes, BytesMut};
use citrine_binary::{BinaryError, BinaryReader, BinaryWriter};

use super::checksum::checksum;

/// Bytes of framing in front of the payload: sequence number (4), checksum
/// (2), packet length including the header (2), flags (1).
pub const HEADER_LEN: usize = 9;

/// Flag bit marking the transfer header packet.
pub const FLAG_FIRST: u8 = 0x01;
/// Flag bit marking the terminal packet.
pub const FLAG_LAST: u8 = 0x02;

/// Offset of the checksum field within the frame.
const CHECKSUM_OFFSET: usize = 4;
/// A FIRST payload starts with four bytes announcing the ACK port.
const INIT_PORT_LEN: usize = 4;

/// One logical packet of the transfer.
///
/// The payload of a FIRST packet carries the ACK-channel port (4 bytes,
/// network byte order) followed by the raw file name; a LAST payload is
/// empty; everything else is file bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub sequence: u32,
    pub flags: u8,
    pub payload: Bytes,
}

impl DataPacket {
    /// Serializes the packet into its framed wire form, checksum included.
    pub fn encode(&self) -> Bytes {
        let total = HEADER_LEN + self.payload.len();
        debug_assert!(total <= u16::MAX as usize);

        let mut frame = BytesMut::with_capacity(total);
        frame.write_u32_be(self.sequence);
        frame.write_u16_be(0); // checksum, patched in below
        frame.write_u16_be(total as u16);
        frame.write_u8(self.flags);
        frame.write_bytes(&self.payload);

        let sum = checksum(&frame);
        frame[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
        frame.freeze()
    }

    /// Deserializes a received datagram, rejecting corrupt frames: shorter
    /// than the header, declaring more bytes than arrived, failing the
    /// checksum, or a FIRST payload too short to hold the ACK port.
    pub fn decode(frame: &[u8]) -> Result<Self, BinaryError> {
        if frame.len() < HEADER_LEN {
            return Err(BinaryError::UnexpectedEof {
                needed: HEADER_LEN,
                remaining: frame.len(),
            });
        }

        let stated = usize::from(u16::from_be_bytes([frame[6], frame[7]]));
        if stated > frame.len() {
            return Err(BinaryError::InvalidData(format!(
                "declared length {stated} exceeds received {} bytes",
                frame.len()
            )));
        }
        if stated < HEADER_LEN {
            return Err(BinaryError::InvalidData(format!(
                "declared length {stated} shorter than the header"
            )));
        }
        if checksum(&frame[..stated]) != 0 {
            return Err(BinaryError::InvalidData("checksum mismatch".to_string()));
        }

        let mut reader = &frame[..stated];
        let sequence = reader.read_u32_be()?;
        let _checksum = reader.read_u16_be()?;
        let _length = reader.read_u16_be()?;
        let flags = reader.read_u8()?;
        let payload = reader.read_remaining()?;

        if flags & FLAG_FIRST != 0 && payload.len() < INIT_PORT_LEN {
            return Err(BinaryError::InvalidData(
                "header packet payload shorter than the ACK port field".to_string(),
            ));
        }

        Ok(Self { sequence, flags, payload })
    }

    #[inline]
    pub fn is_first(&self) -> bool {
        self.flags & FLAG_FIRST != 0
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.flags & FLAG_LAST != 0
    }

    /// Splits a FIRST payload into the announced ACK port and the file name.
    /// The name is peer-controlled input and is decoded lossily.
    pub fn init_info(&self) -> Option<(u16, String)> {
        if !self.is_first() || self.payload.len() < INIT_PORT_LEN {
            return None;
        }
        let port = u32::from_be_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]) as u16;
        let name = String::from_utf8_lossy(&self.payload[INIT_PORT_LEN..]).into_owned();
        Some((port, name))
    }
}

/// Position label used by the `[send data]` / `[recv data]` log lines:
/// `start` for the header packet, `end` for the terminal one, the byte
/// offset within the file otherwise.
pub(crate) fn offset_label(sequence: u32, flags: u8, segment_size: usize) -> String {
    if flags & FLAG_FIRST != 0 {
        "start".to_string()
    } else if flags & FLAG_LAST != 0 {
        "end".to_string()
    } else {
        (u64::from(sequence.saturating_sub(1)) * segment_size as u64).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let packet = DataPacket {
            sequence: 1,
            flags: 0,
            payload: Bytes::from_static(&[0x41]),
        };
        let frame = packet.encode();

        // seq (1 BE) | checksum | length (10 BE) | flags | payload
        let expected = [0x00, 0x00, 0x00, 0x01, 0xFF, 0xB3, 0x00, 0x0A, 0x00, 0x41];
        assert_eq!(&frame[..], &expected);
        assert_eq!(checksum(&frame), 0);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let packet = DataPacket {
            sequence: 42,
            flags: 0,
            payload: Bytes::from(vec![7u8; 1000]),
        };
        let decoded = DataPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn init_packet_roundtrip() {
        let mut payload = BytesMut::new();
        payload.write_u32_be(45678);
        payload.write_bytes(b"report.bin.recv");
        let packet = DataPacket {
            sequence: 0,
            flags: FLAG_FIRST,
            payload: payload.freeze(),
        };

        let decoded = DataPacket::decode(&packet.encode()).unwrap();
        assert!(decoded.is_first());
        assert!(!decoded.is_last());
        let (port, name) = decoded.init_info().unwrap();
        assert_eq!(port, 45678);
        assert_eq!(name, "report.bin.recv");
    }

    #[test]
    fn last_packet_has_empty_payload() {
        let packet = DataPacket {
            sequence: 9,
            flags: FLAG_LAST,
            payload: Bytes::new(),
        };
        let frame = packet.encode();
        assert_eq!(frame.len(), HEADER_LEN);

        let decoded = DataPacket::decode(&frame).unwrap();
        assert!(decoded.is_last());
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded.init_info(), None);
    }

    #[test]
    fn truncated_frame_rejected() {
        let result = DataPacket::decode(&[0x00, 0x01, 0x02]);
        assert!(matches!(
            result,
            Err(BinaryError::UnexpectedEof { needed: HEADER_LEN, remaining: 3 })
        ));
    }

    #[test]
    fn flipped_payload_byte_rejected() {
        let packet = DataPacket {
            sequence: 3,
            flags: 0,
            payload: Bytes::from_static(b"some file contents"),
        };
        let mut frame = packet.encode().to_vec();
        frame[HEADER_LEN + 4] ^= 0x10;
        assert!(matches!(
            DataPacket::decode(&frame),
            Err(BinaryError::InvalidData(_))
        ));
    }

    #[test]
    fn overdeclared_length_rejected() {
        let packet = DataPacket {
            sequence: 3,
            flags: 0,
            payload: Bytes::from_static(b"abcdef"),
        };
        let frame = packet.encode();
        // Drop the final byte so the stated length exceeds what "arrived".
        assert!(matches!(
            DataPacket::decode(&frame[..frame.len() - 1]),
            Err(BinaryError::InvalidData(_))
        ));
    }

    #[test]
    fn short_init_payload_rejected() {
        let packet = DataPacket {
            sequence: 0,
            flags: FLAG_FIRST,
            payload: Bytes::from_static(&[0x12, 0x34]),
        };
        assert!(matches!(
            DataPacket::decode(&packet.encode()),
            Err(BinaryError::InvalidData(_))
        ));
    }

    #[test]
    fn offset_labels() {
        assert_eq!(offset_label(0, FLAG_FIRST, 1000), "start");
        assert_eq!(offset_label(5, FLAG_LAST, 1000), "end");
        assert_eq!(offset_label(1, 0, 1000), "0");
        assert_eq!(offset_label(3, 0, 1000), "2000");
    }
}
