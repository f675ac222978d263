// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

//! XBee API framing.
//!
//! ```text
//! 0x7E | length (u16 BE) | frame data ... | checksum
//! ```
//!
//! The checksum is `0xFF - (sum of frame data & 0xFF)`. In API mode 2 every
//! byte after the start delimiter that is one of `0x7E 0x7D 0x11 0x13` is sent
//! as `0x7D, byte ^ 0x20`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::config::ApiMode;
use crate::constants::{ESCAPE, ESCAPED_BYTES, ESCAPE_XOR, START_DELIMITER};
use crate::error::BridgeError;
use crate::transport::frame::{OutboundFrame, RawFrame};

/// Longest frame data accepted; anything longer is treated as line noise.
const MAX_FRAME_LEN: usize = 512;

/// Checksum over unescaped frame data.
pub fn checksum(frame_data: &[u8]) -> u8 {
    let sum = frame_data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xFF - sum
}

/// Codec between a serial byte stream and API frames.
#[derive(Debug, Clone, Copy)]
pub struct XBeeCodec {
    escaped: bool,
}

impl Default for XBeeCodec {
    fn default() -> Self {
        Self::new(ApiMode::Escaped)
    }
}

impl XBeeCodec {
    pub fn new(mode: ApiMode) -> Self {
        Self {
            escaped: mode.escaped(),
        }
    }

    fn put_byte(&self, dst: &mut BytesMut, byte: u8) {
        if self.escaped && ESCAPED_BYTES.contains(&byte) {
            dst.put_u8(ESCAPE);
            dst.put_u8(byte ^ ESCAPE_XOR);
        } else {
            dst.put_u8(byte);
        }
    }
}

/// Result of scanning one candidate frame.
enum Scan {
    /// Frame complete: raw bytes consumed and unescaped `length | data | checksum`.
    Complete(usize, Vec<u8>),
    NeedMore,
    /// A new start delimiter interrupted the frame at this raw offset.
    Restart(usize),
    TooLong,
}

impl XBeeCodec {
    /// Scan a candidate frame starting at `src[0] == START_DELIMITER`.
    fn scan(&self, src: &[u8]) -> Scan {
        let mut unescaped = Vec::new();
        let mut needed = None;
        let mut i = 1;
        while i < src.len() {
            let mut byte = src[i];
            if self.escaped && byte == START_DELIMITER {
                return Scan::Restart(i);
            }
            if self.escaped && byte == ESCAPE {
                let Some(next) = src.get(i + 1) else {
                    return Scan::NeedMore;
                };
                byte = next ^ ESCAPE_XOR;
                i += 2;
            } else {
                i += 1;
            }
            unescaped.push(byte);

            if unescaped.len() == 2 {
                let len = u16::from_be_bytes([unescaped[0], unescaped[1]]) as usize;
                if len > MAX_FRAME_LEN {
                    return Scan::TooLong;
                }
                needed = Some(2 + len + 1);
            }
            if needed == Some(unescaped.len()) {
                return Scan::Complete(i, unescaped);
            }
        }
        Scan::NeedMore
    }
}

impl Decoder for XBeeCodec {
    type Item = RawFrame;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match src.iter().position(|b| *b == START_DELIMITER) {
                None => {
                    if !src.is_empty() {
                        debug!("Discarding {} byte(s) outside a frame", src.len());
                        src.clear();
                    }
                    return Ok(None);
                }
                Some(0) => {}
                Some(n) => {
                    debug!("Discarding {} byte(s) before start delimiter", n);
                    src.advance(n);
                }
            }

            let (consumed, unescaped) = match self.scan(src) {
                Scan::Complete(consumed, unescaped) => (consumed, unescaped),
                Scan::NeedMore => return Ok(None),
                Scan::Restart(offset) => {
                    warn!("Incomplete frame interrupted by start delimiter, resyncing");
                    src.advance(offset);
                    continue;
                }
                Scan::TooLong => {
                    warn!("Frame length exceeds {} bytes, resyncing", MAX_FRAME_LEN);
                    src.advance(1);
                    continue;
                }
            };
            src.advance(consumed);

            let (frame_data, tail) = unescaped[2..].split_at(unescaped.len() - 3);
            if checksum(frame_data) != tail[0] {
                warn!(
                    "Dropping frame with bad checksum 0x{:02x} (expected 0x{:02x})",
                    tail[0],
                    checksum(frame_data)
                );
                continue;
            }

            match RawFrame::parse(frame_data) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => warn!("Dropping frame: {}", e),
            }
        }
    }
}

impl Encoder<&OutboundFrame> for XBeeCodec {
    type Error = BridgeError;

    fn encode(&mut self, item: &OutboundFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame_data = item.to_frame_data();
        if frame_data.len() > MAX_FRAME_LEN {
            return Err(BridgeError::MalformedFrame {
                details: format!("outbound frame of {} bytes", frame_data.len()),
            });
        }
        dst.reserve(frame_data.len() * 2 + 4);
        dst.put_u8(START_DELIMITER);
        for byte in (frame_data.len() as u16).to_be_bytes() {
            self.put_byte(dst, byte);
        }
        for byte in &frame_data {
            self.put_byte(dst, *byte);
        }
        self.put_byte(dst, checksum(&frame_data));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Addr16, Addr64};

    fn frame(frame_data: &[u8]) -> Vec<u8> {
        let mut raw = vec![START_DELIMITER];
        raw.extend_from_slice(&(frame_data.len() as u16).to_be_bytes());
        raw.extend_from_slice(frame_data);
        raw.push(checksum(frame_data));
        raw
    }

    #[test]
    fn test_checksum() {
        // Digi reference: AT command NJ
        assert_eq!(checksum(&[0x08, 0x01, 0x4E, 0x4A]), 0x5E);
    }

    #[test]
    fn test_decode_with_garbage_and_partial() {
        let mut codec = XBeeCodec::new(ApiMode::Unescaped);
        let raw = frame(&[0x88, 0x01, b'M', b'Y', 0x00, 0x00, 0x00]);
        let mut src = BytesMut::from(&[0x00, 0x42][..]);
        src.extend_from_slice(&raw[..5]);
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        src.extend_from_slice(&raw[5..]);
        let decoded = codec.decode(&mut src).unwrap().unwrap();
        assert!(matches!(decoded, RawFrame::AtResponse { ref command, .. } if command == "MY"));
        assert!(src.is_empty());
    }

    #[test]
    fn test_bad_checksum_dropped() {
        let mut codec = XBeeCodec::new(ApiMode::Unescaped);
        let mut bad = frame(&[0x88, 0x01, b'S', b'L', 0x00]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = frame(&[0x88, 0x02, b'S', b'H', 0x00]);
        let mut src = BytesMut::new();
        src.extend_from_slice(&bad);
        src.extend_from_slice(&good);
        let decoded = codec.decode(&mut src).unwrap().unwrap();
        assert!(matches!(decoded, RawFrame::AtResponse { frame_id: 2, .. }));
    }

    #[test]
    fn test_escaped_round_trip() {
        let mut codec = XBeeCodec::new(ApiMode::Escaped);
        let mut frame = OutboundFrame::explicit(
            Addr64::new(0x0013_A200_4011_7E7D),
            Addr16::new(0x1113),
            crate::protocol::generate("securityInit", &Default::default()).unwrap(),
        );
        frame.set_frame_id(0x7E);
        let mut dst = BytesMut::new();
        codec.encode(&frame, &mut dst).unwrap();

        // No raw delimiter after the first byte
        assert!(!dst[1..].contains(&START_DELIMITER));
        assert!(!dst[1..].contains(&0x11));
        assert!(!dst[1..].contains(&0x13));

        // Escaped bytes decode back to the original frame data
        let mut unescaped = Vec::new();
        let mut iter = dst[1..].iter();
        while let Some(b) = iter.next() {
            if *b == ESCAPE {
                unescaped.push(iter.next().unwrap() ^ ESCAPE_XOR);
            } else {
                unescaped.push(*b);
            }
        }
        let data = frame.to_frame_data();
        assert_eq!(&unescaped[2..unescaped.len() - 1], &data[..]);
        assert_eq!(unescaped[unescaped.len() - 1], checksum(&data));
    }

    #[test]
    fn test_escaped_decode_split_on_escape() {
        let mut codec = XBeeCodec::new(ApiMode::Escaped);
        // TX status for remote16 0x7D11 needs two escapes
        let data = [0x8B, 0x01, 0x7D, 0x11, 0x00, 0x00, 0x00];
        let mut raw = BytesMut::new();
        raw.put_u8(START_DELIMITER);
        for byte in (data.len() as u16).to_be_bytes().iter().chain(&data).chain(&[checksum(&data)]) {
            codec.put_byte(&mut raw, *byte);
        }

        let split = raw.iter().position(|b| *b == ESCAPE).unwrap() + 1;
        let mut src = BytesMut::from(&raw[..split]);
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        src.extend_from_slice(&raw[split..]);
        let decoded = codec.decode(&mut src).unwrap().unwrap();
        assert!(matches!(
            decoded,
            RawFrame::TxStatus { remote16, .. } if remote16 == Addr16::new(0x7D11)
        ));
    }

    #[test]
    fn test_interrupted_frame_resyncs() {
        let mut codec = XBeeCodec::new(ApiMode::Escaped);
        let good = frame(&[0x88, 0x05, b'S', b'L', 0x00, 0x40, 0x01, 0x02, 0x03]);
        let mut src = BytesMut::from(&[START_DELIMITER, 0x00, 0x20, 0x91][..]);
        src.extend_from_slice(&good);
        let decoded = codec.decode(&mut src).unwrap().unwrap();
        assert!(matches!(decoded, RawFrame::AtResponse { frame_id: 5, .. }));
    }
}
