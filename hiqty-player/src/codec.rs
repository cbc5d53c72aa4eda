//! DCA frame codec
//!
//! A DCA stream is a sequence of Opus packets, each prefixed by its length as
//! a little-endian `i16`.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt stream: negative frame length {0}")]
    NegativeLength(i16),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DcaCodec;

impl Decoder for DcaCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        let len = i16::from_le_bytes([src[0], src[1]]);
        let len = usize::try_from(len).map_err(|_| CodecError::NegativeLength(len))?;

        if src.len() < 2 + len {
            src.reserve(2 + len - src.len());
            return Ok(None);
        }
        src.advance(2);
        Ok(Some(src.split_to(len).freeze()))
    }
}

/// Encode frames in DCA framing; used by tests and dry runs
#[must_use]
pub fn encode_frames<'a>(frames: impl IntoIterator<Item = &'a [u8]>) -> Bytes {
    let mut out = BytesMut::new();
    for frame in frames {
        let len = i16::try_from(frame.len()).unwrap_or(i16::MAX);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&frame[..len as usize]);
    }
    out.freeze()
}
