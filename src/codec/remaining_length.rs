//! MQTT variable-byte-integer encoding of the remaining-length field.
//!
//! Each byte carries seven value bits (least significant group first); the
//! top bit signals that another byte follows. At most four bytes are allowed.

use bytes::BufMut;

use crate::core::constants::{MAX_REMAINING_LENGTH, MAX_REMAINING_LENGTH_BYTES};
use crate::core::{DecodeError, EncodeError};

/// Number of bytes needed to encode `len`.
pub fn remaining_length_size(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Append the encoding of `len` to `buf`.
pub fn encode_remaining_length<B: BufMut>(mut len: usize, buf: &mut B) -> Result<(), EncodeError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(EncodeError::PacketTooLarge(len));
    }

    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

/// Decode a remaining length starting at `buf[offset]`.
///
/// Returns `(length, bytes_consumed)`, or `Ok(None)` when the buffer ends
/// before the terminating byte. Never fails on partial input; fails only
/// when a fifth continuation byte would be required.
pub fn decode_remaining_length(
    buf: &[u8],
    offset: usize,
) -> Result<Option<(usize, usize)>, DecodeError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for i in 0..MAX_REMAINING_LENGTH_BYTES {
        let Some(&byte) = buf.get(offset + i) else {
            return Ok(None);
        };

        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }

    Err(DecodeError::MalformedRemainingLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(len: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_remaining_length(len, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encoding_boundaries() {
        let cases: [(usize, &[u8]); 8] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x80, 0x80, 0x01]),
            (2_097_151, &[0xFF, 0xFF, 0x7F]),
            (2_097_152, &[0x80, 0x80, 0x80, 0x01]),
            (268_435_455, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ];

        for (len, expected) in cases {
            let encoded = encode(len);
            assert_eq!(encoded, expected, "encoding {len}");
            assert_eq!(remaining_length_size(len), expected.len());
            assert_eq!(
                decode_remaining_length(&encoded, 0).unwrap(),
                Some((len, expected.len())),
                "decoding {len}"
            );
        }
    }

    #[test]
    fn test_too_large() {
        let mut buf = Vec::new();
        assert_eq!(
            encode_remaining_length(MAX_REMAINING_LENGTH + 1, &mut buf),
            Err(EncodeError::PacketTooLarge(MAX_REMAINING_LENGTH + 1))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_at_offset() {
        // Fixed header byte followed by a two-byte length
        let buf = [0x30, 0xC1, 0x02, 0xAA];
        assert_eq!(decode_remaining_length(&buf, 1).unwrap(), Some((321, 2)));
    }

    #[test]
    fn test_incomplete() {
        assert_eq!(decode_remaining_length(&[], 0).unwrap(), None);
        assert_eq!(decode_remaining_length(&[0x80], 0).unwrap(), None);
        assert_eq!(decode_remaining_length(&[0xFF, 0xFF, 0xFF], 0).unwrap(), None);
        assert_eq!(decode_remaining_length(&[0x10], 1).unwrap(), None);
    }

    #[test]
    fn test_five_bytes_malformed() {
        assert_eq!(
            decode_remaining_length(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01], 0),
            Err(DecodeError::MalformedRemainingLength)
        );
        // Rejected as soon as the fourth byte still has its continuation bit
        assert_eq!(
            decode_remaining_length(&[0x80, 0x80, 0x80, 0x80], 0),
            Err(DecodeError::MalformedRemainingLength)
        );
    }
}
