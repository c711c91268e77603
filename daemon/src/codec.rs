//! Sentinel-terminated JSON frames.
//!
//! Every message on the wire is a compact JSON document followed by
//! `\r\n\r\n`. Compact JSON escapes CR and LF inside strings, so the sentinel
//! never occurs inside a frame.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const SENTINEL: &[u8] = b"\r\n\r\n";

/// Frames larger than this are rejected rather than buffered forever.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SentinelCodec {
    max_len: usize,
    /// Bytes already scanned without finding the sentinel
    scanned: usize,
}

impl SentinelCodec {
    pub fn new() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len,
            scanned: 0,
        }
    }
}

impl Default for SentinelCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SentinelCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            // Rescan the last few bytes in case the sentinel straddles reads.
            let from = self.scanned.saturating_sub(SENTINEL.len() - 1);
            let Some(pos) = src[from..]
                .windows(SENTINEL.len())
                .position(|w| w == SENTINEL)
                .map(|p| p + from)
            else {
                if src.len() > self.max_len {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("frame exceeds {} bytes", self.max_len),
                    ));
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let frame = src.split_to(pos);
            src.advance(SENTINEL.len());
            self.scanned = 0;

            // Blank keep-alive frames carry nothing.
            let text = String::from_utf8_lossy(&frame);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            return Ok(Some(text.to_string()));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // A trailing unterminated message is still a request.
        let rest = String::from_utf8_lossy(src).trim().to_string();
        src.clear();
        self.scanned = 0;
        Ok((!rest.is_empty()).then_some(rest))
    }
}

impl<T: AsRef<str>> Encoder<T> for SentinelCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let item = item.as_ref();
        dst.reserve(item.len() + SENTINEL.len());
        dst.put_slice(item.as_bytes());
        dst.put_slice(SENTINEL);
        Ok(())
    }
}
