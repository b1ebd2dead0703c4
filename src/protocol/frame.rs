//! Frame encoding and decoding for the pod protocol.
//!
//! Responses are ASCII lines:
//! ```text
//! ┌───────┬──────────────┬───┬──────────┬──────┐
//! │  TAG  │ ,field,...   │ ; │ CHECKSUM │ \r\n │
//! └───────┴──────────────┴───┴──────────┴──────┘
//!  └──────── payload ────────┘
//! ```
//! The checksum covers the payload plus the `;` separator, see
//! [`checksum`](super::checksum).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::checksum;
use crate::error::FrameError;

/// Command accepted.
pub const ACK: &str = "!ACK";

/// Command rejected.
pub const NACK: &str = "!NACK";

/// Full payload of the frame that ends a long exchange.
pub const IDLE: &str = "!STATUS,IDLE";

/// Tag carried by primary (RP) measurement results.
pub const RP_TAG: &str = "!RP";

/// Line terminator used in both directions.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Longest line the decoder buffers before giving up on it.
pub const MAX_LINE_SIZE: usize = 4096;

/// A single response line split into payload and checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: String,
    checksum: String,
}

impl Frame {
    /// Splits a decoded line (terminator already stripped) at the first `;`.
    ///
    /// The checksum is not checked here, use [`Frame::verify`].
    pub fn parse(line: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(line).map_err(|_| FrameError::NotText)?;
        let (payload, checksum) = text
            .split_once(';')
            .ok_or_else(|| FrameError::MissingChecksum(text.to_owned()))?;
        Ok(Self {
            payload: payload.trim().to_owned(),
            checksum: checksum.trim().to_owned(),
        })
    }

    /// Checks the checksum segment against the payload.
    pub fn verify(&self) -> Result<(), FrameError> {
        let expected = checksum::checksum(self.payload.as_bytes());
        if expected == self.checksum {
            Ok(())
        } else {
            Err(FrameError::ChecksumMismatch {
                expected,
                got: self.checksum.clone(),
            })
        }
    }

    /// The payload segment (everything before `;`).
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The checksum segment.
    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// The message-type tag (first comma-separated field).
    #[must_use]
    pub fn tag(&self) -> &str {
        self.payload.split(',').next().unwrap_or_default()
    }

    /// Returns the comma-separated field at `index` (the tag is field 0).
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&str> {
        self.payload.split(',').nth(index)
    }

    /// Like [`Frame::field`] but reports a missing field as an error.
    pub fn require_field(&self, index: usize) -> Result<&str, FrameError> {
        self.field(index).ok_or_else(|| FrameError::MissingField {
            payload: self.payload.clone(),
            index,
        })
    }

    /// True for the `!STATUS,IDLE` frame.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.payload == IDLE
    }

    /// Consumes the frame, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> String {
        self.payload
    }
}

/// Encodes `payload` as a complete checksummed line, the way a pod sends it.
#[must_use]
pub fn encode(payload: &str) -> Bytes {
    let sum = checksum::checksum(payload.as_bytes());
    let mut buf = BytesMut::with_capacity(payload.len() + sum.len() + 3);
    buf.put_slice(payload.as_bytes());
    buf.put_u8(b';');
    buf.put_slice(sum.as_bytes());
    buf.put_slice(LINE_TERMINATOR);
    buf.freeze()
}

/// Line decoder that handles partial data.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Creates a new frame decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete line.
    ///
    /// Returns `Ok(Some(line))` without the `\r\n` terminator, `Ok(None)` if
    /// more data is needed. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] and drops the buffered bytes if no
    /// terminator shows up within [`MAX_LINE_SIZE`] bytes.
    pub fn decode(&mut self) -> Result<Option<Bytes>, FrameError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > MAX_LINE_SIZE {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    return Err(FrameError::TooLarge {
                        size,
                        max: MAX_LINE_SIZE,
                    });
                }
                return Ok(None);
            };

            let mut line = self.buffer.split_to(pos);
            self.buffer.advance(1); // '\n'
            while line.last().is_some_and(|b| b.is_ascii_whitespace()) {
                line.truncate(line.len() - 1);
            }
            while line.first().is_some_and(|b| b.is_ascii_whitespace()) {
                line.advance(1);
            }

            if !line.is_empty() {
                return Ok(Some(line.freeze()));
            }
        }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_checksum_and_terminator() {
        let line = encode("!ACK");
        assert_eq!(&line[..], b"!ACK;24C5\r\n");
    }

    #[test]
    fn test_parse_and_fields() {
        let frame = Frame::parse(b"!ACK,GET,SER_NUMBER,AB12CD34EF56;B26B").unwrap();
        assert_eq!(frame.tag(), ACK);
        assert_eq!(frame.field(3), Some("AB12CD34EF56"));
        assert_eq!(frame.field(4), None);
        assert!(frame.verify().is_ok());
        assert!(!frame.is_idle());
    }

    #[test]
    fn test_parse_idle() {
        let frame = Frame::parse(b"!STATUS,IDLE;F5D5").unwrap();
        assert!(frame.is_idle());
        assert_eq!(frame.tag(), "!STATUS");
    }

    #[test]
    fn test_verify_rejects_bad_checksum() {
        let frame = Frame::parse(b"!ACK;24C6").unwrap();
        assert_eq!(
            frame.verify(),
            Err(FrameError::ChecksumMismatch {
                expected: "24C5".into(),
                got: "24C6".into(),
            })
        );
    }

    #[test]
    fn test_parse_without_separator() {
        assert!(matches!(
            Frame::parse(b"!ACK"),
            Err(FrameError::MissingChecksum(_))
        ));
    }

    #[test]
    fn test_require_field() {
        let frame = Frame::parse(b"!ACK;24C5").unwrap();
        assert!(matches!(
            frame.require_field(3),
            Err(FrameError::MissingField { index: 3, .. })
        ));
    }

    #[test]
    fn test_decode_partial_line() {
        let mut decoder = FrameDecoder::new();

        decoder.feed(b"!ACK;2");
        assert_eq!(decoder.decode().unwrap(), None);

        decoder.feed(b"4C5\r\n");
        assert_eq!(
            decoder.decode().unwrap(),
            Some(Bytes::from_static(b"!ACK;24C5"))
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_multiple_lines() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"!ACK;24C5\r\n\r\n!STATUS,IDLE;F5D5\r\n");

        assert_eq!(
            decoder.decode().unwrap(),
            Some(Bytes::from_static(b"!ACK;24C5"))
        );
        assert_eq!(
            decoder.decode().unwrap(),
            Some(Bytes::from_static(b"!STATUS,IDLE;F5D5"))
        );
        assert_eq!(decoder.decode().unwrap(), None);
    }

    #[test]
    fn test_decode_oversized_line() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&vec![b'x'; MAX_LINE_SIZE + 1]);
        assert!(matches!(
            decoder.decode(),
            Err(FrameError::TooLarge { .. })
        ));
        assert_eq!(decoder.buffered(), 0);
    }
}
