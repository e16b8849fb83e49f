//! Tokio codec for newline-delimited JSON frames

use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Maximum size of a single frame, excluding the terminating newline
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Codec that decodes one `D` per line and encodes any serializable value
/// as a single line.
///
/// A frame that reaches EOF without a trailing newline is still decoded,
/// so clients that write the request and half-close work too.
pub struct JsonLineCodec<D> {
    /// Offset already scanned for a newline
    next_index: usize,
    _decoded: PhantomData<fn() -> D>,
}

impl<D> JsonLineCodec<D> {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            next_index: 0,
            _decoded: PhantomData,
        }
    }

    fn parse(line: &[u8]) -> Result<D, ProtocolError>
    where
        D: DeserializeOwned,
    {
        let text = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(serde_json::from_str(text.trim())?)
    }
}

impl<D> Default for JsonLineCodec<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> std::fmt::Debug for JsonLineCodec<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLineCodec")
            .field("next_index", &self.next_index)
            .finish()
    }
}

impl<D: DeserializeOwned> Decoder for JsonLineCodec<D> {
    type Item = D;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            let Some(end) = newline else {
                if src.len() > MAX_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        size: src.len(),
                        max: MAX_FRAME_SIZE,
                    });
                }
                self.next_index = src.len();
                return Ok(None);
            };

            self.next_index = 0;
            if end > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge {
                    size: end,
                    max: MAX_FRAME_SIZE,
                });
            }

            let line = src.split_to(end + 1);
            let line = &line[..end];

            // Blank keepalive lines carry nothing
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Self::parse(line).map(Some);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }

        self.next_index = 0;
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }

        let rest = src.split();
        Self::parse(&rest).map(Some)
    }
}

impl<D, E: Serialize> Encoder<E> for JsonLineCodec<D> {
    type Error = ProtocolError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(payload.len() + 1);
        dst.extend_from_slice(&payload);
        dst.put_u8(b'\n');

        Ok(())
    }
}
