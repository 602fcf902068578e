//! Frame codec: `[FIN|RSV|opcode][MASK|len7][ext len 0/2/8][mask key 0/4][payload]`.
//!
//! Only whole, unfragmented messages are produced. Decoding works on one
//! frame at the front of a buffer; accumulating bytes across socket reads is
//! the caller's job ([`parse_header`] tells it how many bytes a frame needs).

use crate::constants::{CloseCode, MAX_CONTROL_PAYLOAD, MessageKind, OpCode};

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// A decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub payload_len: u64,
    pub mask_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

/// Fixed part of a frame, available before the payload has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// Raw low nibble of byte 0; may not be a known opcode.
    pub opcode: u8,
    pub masked: bool,
    pub mask_key: Option<[u8; 4]>,
    pub payload_len: u64,
    pub header_len: usize,
}

impl FrameHeader {
    /// Total wire size of the frame (header plus payload).
    pub fn frame_len(&self) -> u64 {
        self.header_len as u64 + self.payload_len
    }
}

/// Errors from frame decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: header incomplete")]
    FrameTooShort,

    #[error("truncated payload: declared {declared} bytes, {available} available")]
    TruncatedPayload { declared: u64, available: usize },

    #[error("invalid 64-bit payload length {0:#x}")]
    InvalidLength(u64),

    #[error("invalid opcode {0:#x}")]
    InvalidOpcode(u8),
}

/// Encodes an application message as a single unmasked server frame.
pub fn encode(payload: &[u8], kind: MessageKind) -> Vec<u8> {
    encode_frame(kind.into(), payload)
}

/// Encodes a final, unmasked frame with the given opcode.
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut buf = Vec::with_capacity(10 + len);
    buf.push(FIN_BIT | opcode.as_u8());

    if len < LEN_16 as usize {
        buf.push(len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(LEN_16);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(LEN_64);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }

    buf.extend_from_slice(payload);
    buf
}

/// Encodes a Close frame.
///
/// With a code the payload is the big-endian status followed by `reason`,
/// cut at a character boundary so the payload stays within 125 bytes.
/// Without a code the payload is empty.
pub fn encode_close(code: Option<CloseCode>, reason: &str) -> Vec<u8> {
    let Some(code) = code else {
        return encode_frame(OpCode::Close, &[]);
    };

    let mut payload = Vec::with_capacity(MAX_CONTROL_PAYLOAD);
    payload.extend_from_slice(&u16::from(code).to_be_bytes());

    let mut cut = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(cut) {
        cut -= 1;
    }
    payload.extend_from_slice(&reason.as_bytes()[..cut]);

    encode_frame(OpCode::Close, &payload)
}

/// Parses the status code out of a Close frame payload, if it carries one.
pub fn close_code(payload: &[u8]) -> Option<CloseCode> {
    match payload {
        [hi, lo, ..] => Some(CloseCode::from(u16::from_be_bytes([*hi, *lo]))),
        _ => None,
    }
}

/// Parses the header of the frame at the front of `buf`.
///
/// Fails with [`FrameError::FrameTooShort`] until every header byte
/// (extended length and mask key included) is present.
pub fn parse_header(buf: &[u8]) -> Result<FrameHeader, FrameError> {
    let [b0, b1, rest @ ..] = buf else {
        return Err(FrameError::FrameTooShort);
    };

    let fin = b0 & FIN_BIT != 0;
    let opcode = b0 & 0x0F;
    let masked = b1 & MASK_BIT != 0;
    let len7 = b1 & 0x7F;

    let (payload_len, ext_len) = match len7 {
        LEN_16 => {
            let bytes = rest.get(..2).ok_or(FrameError::FrameTooShort)?;
            (u64::from(u16::from_be_bytes([bytes[0], bytes[1]])), 2)
        }
        LEN_64 => {
            let bytes: [u8; 8] = rest
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .ok_or(FrameError::FrameTooShort)?;
            let len = u64::from_be_bytes(bytes);
            if len >> 63 != 0 {
                return Err(FrameError::InvalidLength(len));
            }
            (len, 8)
        }
        n => (u64::from(n), 0),
    };

    let mask_key = if masked {
        let key: [u8; 4] = rest
            .get(ext_len..ext_len + 4)
            .and_then(|b| b.try_into().ok())
            .ok_or(FrameError::FrameTooShort)?;
        Some(key)
    } else {
        None
    };

    Ok(FrameHeader {
        fin,
        opcode,
        masked,
        mask_key,
        payload_len,
        header_len: 2 + ext_len + if masked { 4 } else { 0 },
    })
}

/// Decodes the frame at the front of `buf`, unmasking its payload.
///
/// Bytes after the frame are ignored.
pub fn decode(buf: &[u8]) -> Result<Frame, FrameError> {
    let header = parse_header(buf)?;
    let available = buf.len() - header.header_len;

    if (available as u64) < header.payload_len {
        return Err(FrameError::TruncatedPayload {
            declared: header.payload_len,
            available,
        });
    }

    let opcode =
        OpCode::from_nibble(header.opcode).ok_or(FrameError::InvalidOpcode(header.opcode))?;

    // Fits in usize: it is bounded by `available`.
    let end = header.header_len + header.payload_len as usize;
    let mut payload = buf[header.header_len..end].to_vec();
    if let Some(key) = header.mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        fin: header.fin,
        opcode,
        masked: header.masked,
        payload_len: header.payload_len,
        mask_key: header.mask_key,
        payload,
    })
}

/// XORs `bytes` with the repeating 4-byte `key`. Applying it twice is a no-op.
pub fn apply_mask(bytes: &mut [u8], key: [u8; 4]) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b ^= key[i & 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a masked client frame the way a browser would.
    fn client_frame(opcode: OpCode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
        let mut frame = encode_frame(opcode, payload);
        let header_len = frame.len() - payload.len();
        frame[1] |= MASK_BIT;
        let mut masked = payload.to_vec();
        apply_mask(&mut masked, key);
        frame.truncate(header_len);
        frame.extend_from_slice(&key);
        frame.extend_from_slice(&masked);
        frame
    }

    #[test]
    fn round_trip_text_lengths() {
        for len in [0usize, 10, 125, 126, 65535, 65536] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frame = decode(&encode(&payload, MessageKind::Text)).unwrap();
            assert_eq!(frame.opcode, OpCode::Text, "len {len}");
            assert!(!frame.masked);
            assert!(frame.fin);
            assert_eq!(frame.mask_key, None);
            assert_eq!(frame.payload_len, len as u64);
            assert_eq!(frame.payload, payload, "len {len}");
        }
    }

    #[test]
    fn length_field_layout() {
        let f = encode(&[0u8; 125], MessageKind::Text);
        assert_eq!(&f[..2], &[0x81, 125]);
        assert_eq!(f.len(), 2 + 125);

        let f = encode(&[0u8; 126], MessageKind::Text);
        assert_eq!(&f[..4], &[0x81, 126, 0x00, 0x7E]);
        assert_eq!(f.len(), 4 + 126);

        let f = encode(&vec![0u8; 65535], MessageKind::Binary);
        assert_eq!(&f[..4], &[0x82, 126, 0xFF, 0xFF]);
        assert_eq!(f.len(), 4 + 65535);

        let f = encode(&vec![0u8; 65536], MessageKind::Binary);
        assert_eq!(&f[..10], &[0x82, 127, 0, 0, 0, 0, 0, 0x01, 0x00, 0x00]);
        assert_eq!(f.len(), 10 + 65536);
    }

    #[test]
    fn decode_rfc_masked_hello() {
        // RFC 6455 §5.7: a single-frame masked text message containing "Hello".
        let bytes = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let frame = decode(&bytes).unwrap();
        assert!(frame.masked);
        assert_eq!(frame.mask_key, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(frame.payload, b"Hello");
        assert_eq!(frame.payload_len, 5);
    }

    #[test]
    fn decode_masked_extended_length() {
        let payload: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let key = [0xA1, 0x02, 0xB3, 0x04];
        let bytes = client_frame(OpCode::Binary, &payload, key);
        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn mask_is_self_inverse() {
        let original = b"the quick brown fox".to_vec();
        let key = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut data = original.clone();
        apply_mask(&mut data, key);
        assert_ne!(data, original);
        apply_mask(&mut data, key);
        assert_eq!(data, original);
    }

    #[test]
    fn too_short_buffers() {
        assert_eq!(decode(&[]), Err(FrameError::FrameTooShort));
        assert_eq!(decode(&[0x81]), Err(FrameError::FrameTooShort));
        // 16-bit length announced but missing.
        assert_eq!(decode(&[0x81, 126, 0x01]), Err(FrameError::FrameTooShort));
        // Mask bit set but key missing.
        assert_eq!(decode(&[0x81, 0x85, 0x37]), Err(FrameError::FrameTooShort));
    }

    #[test]
    fn truncated_payload() {
        assert_eq!(
            decode(&[0x81, 0x05, b'h', b'e']),
            Err(FrameError::TruncatedPayload {
                declared: 5,
                available: 2
            })
        );
    }

    #[test]
    fn invalid_length_and_opcode() {
        let mut bytes = vec![0x82, 127];
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(decode(&bytes), Err(FrameError::InvalidLength(u64::MAX)));

        assert_eq!(decode(&[0x83, 0x00]), Err(FrameError::InvalidOpcode(0x3)));
    }

    #[test]
    fn header_reports_frame_len() {
        let bytes = client_frame(OpCode::Text, &[1u8; 200], [1, 2, 3, 4]);
        let header = parse_header(&bytes[..8]).unwrap();
        assert_eq!(header.header_len, 8);
        assert_eq!(header.payload_len, 200);
        assert_eq!(header.frame_len(), bytes.len() as u64);
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut bytes = encode(b"one", MessageKind::Text);
        bytes.extend_from_slice(&encode(b"two", MessageKind::Text));
        assert_eq!(decode(&bytes).unwrap().payload, b"one");
    }

    #[test]
    fn fin_bit_is_read() {
        let frame = decode(&[0x01, 0x01, b'x']).unwrap();
        assert!(!frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
    }

    #[test]
    fn control_frames() {
        assert_eq!(encode_frame(OpCode::Ping, &[]), vec![0x89, 0x00]);
        assert_eq!(encode_frame(OpCode::Pong, &[]), vec![0x8A, 0x00]);
        assert_eq!(encode_close(None, ""), vec![0x88, 0x00]);
        assert_eq!(
            encode_close(Some(CloseCode::NormalClosure), "bye"),
            vec![0x88, 0x05, 0x03, 0xE8, b'b', b'y', b'e']
        );
    }

    #[test]
    fn close_reason_truncated_to_control_limit() {
        let reason = "é".repeat(100); // 200 bytes
        let frame = encode_close(Some(CloseCode::GoingAway), &reason);
        let decoded = decode(&frame).unwrap();
        assert!(decoded.payload.len() <= MAX_CONTROL_PAYLOAD);
        assert!(std::str::from_utf8(&decoded.payload[2..]).is_ok());
        assert_eq!(close_code(&decoded.payload), Some(CloseCode::GoingAway));
    }

    #[test]
    fn close_code_parsing() {
        assert_eq!(close_code(&[]), None);
        assert_eq!(close_code(&[0x03]), None);
        assert_eq!(close_code(&[0x03, 0xF1]), Some(CloseCode::MessageTooBig));
    }
}
