//! RFC 6455 §5 frame parsing and emission.
//!
//! The decoder follows the transport contract of the HTTP codecs: it
//! consumes from the connection's receive buffer and returns `Ok(None)`
//! until a whole frame is available, then unmasks the payload in place.

use bytes::{Buf, BufMut, BytesMut};

use crate::ensure;
use crate::websocket::{Opcode, WsError};

/// One parsed inbound frame, payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: bytes::Bytes,
}

/// Incremental frame parser for the client-to-server direction.
pub(crate) struct FrameDecoder {
    max_payload: usize,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Bytes one frame may occupy in the receive buffer: the largest header
    /// (2 + 8 extended-length + 4 mask) plus the payload ceiling.
    pub fn frame_cap(&self) -> usize {
        self.max_payload + 14
    }

    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let (b0, b1) = (src[0], src[1]);
        ensure!(b0 & 0x70 == 0, WsError::protocol("reserved bits must be zero"));

        let Some(opcode) = Opcode::from_bits(b0 & 0x0F) else {
            return Err(WsError::protocol("unknown opcode"));
        };
        let fin = b0 & 0x80 != 0;

        // inbound frames must carry the client masking key
        ensure!(b1 & 0x80 != 0, WsError::protocol("client frame is not masked"));

        let len7 = b1 & 0x7F;
        let header_len = 2
            + match len7 {
                126 => 2,
                127 => 8,
                _ => 0,
            }
            + 4;
        if src.len() < header_len {
            return Ok(None);
        }

        let payload_len = match len7 {
            126 => u64::from(u16::from_be_bytes([src[2], src[3]])),
            127 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&src[2..10]);
                u64::from_be_bytes(bytes)
            }
            n => u64::from(n),
        };

        if opcode.is_control() {
            ensure!(fin, WsError::protocol("fragmented control frame"));
            ensure!(payload_len <= 125, WsError::protocol("control frame payload over 125 bytes"));
        }
        ensure!(
            payload_len <= self.max_payload as u64,
            WsError::TooLarge { limit: self.max_payload }
        );
        let payload_len = payload_len as usize;

        if src.len() < header_len + payload_len {
            return Ok(None);
        }

        let key_at = header_len - 4;
        let key = [src[key_at], src[key_at + 1], src[key_at + 2], src[key_at + 3]];

        src.advance(header_len);
        let mut payload = src.split_to(payload_len);
        apply_mask(&mut payload, key);

        Ok(Some(Frame { fin, opcode, payload: payload.freeze() }))
    }
}

/// XOR with the repeating 4-byte key. Involutive: the same transformation
/// masks and unmasks.
pub(crate) fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Emits one server-to-client frame: FIN always set, never masked.
pub(crate) fn encode_frame(opcode: Opcode, payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(10 + payload.len());
    dst.put_u8(0x80 | opcode as u8);

    if payload.len() < 126 {
        dst.put_u8(payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        dst.put_u8(126);
        dst.put_u16(payload.len() as u16);
    } else {
        dst.put_u8(127);
        dst.put_u64(payload.len() as u64);
    }

    dst.put_slice(payload);
}

#[cfg(test)]
pub(crate) mod tests {
    use proptest::prelude::*;

    use super::*;

    pub(crate) fn masked_frame(fin: bool, opcode: u8, key: [u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut wire = Vec::new();
        wire.push(if fin { 0x80 } else { 0x00 } | opcode);

        if payload.len() < 126 {
            wire.push(0x80 | payload.len() as u8);
        } else if payload.len() <= u16::MAX as usize {
            wire.push(0x80 | 126);
            wire.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        } else {
            wire.push(0x80 | 127);
            wire.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }

        wire.extend_from_slice(&key);
        let mut masked = payload.to_vec();
        apply_mask(&mut masked, key);
        wire.extend_from_slice(&masked);
        wire
    }

    #[test]
    fn decodes_a_masked_text_frame() {
        let wire = masked_frame(true, 0x1, [0x37, 0xfa, 0x21, 0x3d], b"ping");
        let mut buf = BytesMut::from(&wire[..]);

        let frame = FrameDecoder::new(16384).decode(&mut buf).unwrap().unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"ping");
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_a_complete_frame() {
        let wire = masked_frame(true, 0x1, [1, 2, 3, 4], b"hello");
        let mut decoder = FrameDecoder::new(16384);

        let mut buf = BytesMut::new();
        for (i, byte) in wire.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let frame = decoder.decode(&mut buf).unwrap();
            assert_eq!(frame.is_some(), i == wire.len() - 1);
        }
    }

    #[test]
    fn decodes_extended_16_bit_lengths() {
        let payload = vec![0xAB; 300];
        let wire = masked_frame(true, 0x2, [9, 9, 9, 9], &payload);
        let mut buf = BytesMut::from(&wire[..]);

        let frame = FrameDecoder::new(16384).decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Binary);
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn rejects_unmasked_inbound_frames() {
        // FIN + text, length 4, no mask bit
        let mut buf = BytesMut::from(&[0x81u8, 0x04, b'p', b'i', b'n', b'g'][..]);
        let err = FrameDecoder::new(16384).decode(&mut buf).unwrap_err();
        assert!(matches!(err, WsError::Protocol { .. }));
    }

    #[test]
    fn rejects_reserved_bits() {
        let mut wire = masked_frame(true, 0x1, [0, 0, 0, 0], b"x");
        wire[0] |= 0x40;
        let err = FrameDecoder::new(16384).decode(&mut BytesMut::from(&wire[..])).unwrap_err();
        assert!(matches!(err, WsError::Protocol { .. }));
    }

    #[test]
    fn rejects_unknown_opcodes() {
        let wire = masked_frame(true, 0x3, [0, 0, 0, 0], b"");
        let err = FrameDecoder::new(16384).decode(&mut BytesMut::from(&wire[..])).unwrap_err();
        assert!(matches!(err, WsError::Protocol { .. }));
    }

    #[test]
    fn rejects_oversized_and_fragmented_control_frames() {
        let long = masked_frame(true, 0x9, [0, 0, 0, 0], &[0u8; 126]);
        assert!(FrameDecoder::new(16384).decode(&mut BytesMut::from(&long[..])).is_err());

        let unfinished = masked_frame(false, 0x8, [0, 0, 0, 0], b"");
        assert!(FrameDecoder::new(16384).decode(&mut BytesMut::from(&unfinished[..])).is_err());
    }

    #[test]
    fn rejects_payloads_over_the_ceiling() {
        let wire = masked_frame(true, 0x2, [0, 0, 0, 0], &[0u8; 200]);
        let err = FrameDecoder::new(128).decode(&mut BytesMut::from(&wire[..])).unwrap_err();
        assert!(matches!(err, WsError::TooLarge { limit: 128 }));
    }

    #[test]
    fn emits_the_right_header_for_each_length_class() {
        let mut small = BytesMut::new();
        encode_frame(Opcode::Text, &[0u8; 125], &mut small);
        assert_eq!(&small[..2], &[0x81, 125]);

        let mut medium = BytesMut::new();
        encode_frame(Opcode::Binary, &[0u8; 126], &mut medium);
        assert_eq!(&medium[..4], &[0x82, 126, 0, 126]);

        let mut large = BytesMut::new();
        encode_frame(Opcode::Binary, &[0u8; 70000], &mut large);
        assert_eq!(&large[..2], &[0x82, 127]);
        assert_eq!(&large[2..10], &70000u64.to_be_bytes());
    }

    proptest! {
        /// unmask(mask(p)) == p and mask round-trips through the decoder.
        #[test]
        fn masking_law(payload in proptest::collection::vec(any::<u8>(), 0..512), key: [u8; 4]) {
            let mut masked = payload.clone();
            apply_mask(&mut masked, key);
            let mut unmasked = masked.clone();
            apply_mask(&mut unmasked, key);
            prop_assert_eq!(&unmasked, &payload);
        }

        #[test]
        fn any_masked_frame_round_trips(payload in proptest::collection::vec(any::<u8>(), 0..512), key: [u8; 4]) {
            let wire = masked_frame(true, 0x2, key, &payload);
            let mut buf = BytesMut::from(&wire[..]);
            let frame = FrameDecoder::new(1024).decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        }
    }
}
