//! Line codec: frames a TCP byte stream into protocol lines.
//!
//! Inbound, clients may terminate lines with `\n`, `\r`, or `\r\n`; all
//! three are accepted and empty lines are swallowed. Outbound lines are
//! always terminated with `\r\n`. The codec carries raw `String` lines;
//! tokenisation happens in [`super::command`].

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum line length, per RFC 2812.
const MAX_LINE_LENGTH: usize = 512;

/// Codec error: an over-long line, bad encoding, or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error("line is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames protocol lines on `\n`, `\r`, or `\r\n`.
#[derive(Debug, Default)]
pub struct LineCodec;

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let terminator = src.iter().position(|&b| b == b'\r' || b == b'\n');

            let Some(pos) = terminator else {
                // No complete line yet. Check if the buffer is getting too large.
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                return Ok(None);
            };

            // Extract the line, then consume the terminator. A `\r\n` pair
            // is consumed whole; a bare `\r` at the end of the buffer leaves
            // the `\n` to be swallowed as an empty line on the next pass.
            let line_bytes = src.split_to(pos);
            let ending = src[0];
            src.advance(1);
            if ending == b'\r' && src.first() == Some(&b'\n') {
                src.advance(1);
            }

            if line_bytes.is_empty() {
                continue;
            }
            if line_bytes.len() > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong);
            }

            let line = std::str::from_utf8(&line_bytes)?;
            return Ok(Some(line.to_owned()));
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 2);
        dst.put_slice(item.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
