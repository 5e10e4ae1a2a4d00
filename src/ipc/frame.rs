//! Length-prefixed message framing.
//!
//! Every message on the duplex channel is a 4-byte little-endian unsigned
//! length followed by exactly that many bytes of UTF-8 JSON. The decoder
//! reassembles frames across arbitrary chunk boundaries; a partial header
//! or body left at peer close is a framing error, never a phantom message.

use bytes::{Buf, BytesMut};

use super::message::IpcMessage;

/// Hard frame ceiling. Peers announcing anything larger are dropped.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

const HEADER_BYTES: usize = 4;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    #[error("peer closed mid-frame with {buffered} bytes buffered")]
    TruncatedFrame { buffered: usize },
}

/// Encode one message into its framed byte form.
pub fn encode_frame(msg: &IpcMessage) -> Result<Vec<u8>, FrameError> {
    // IpcMessage serialization cannot fail: it is four plain fields.
    let body = serde_json::to_vec(msg).unwrap_or_default();
    if body.len() > MAX_FRAME_BYTES {
        return Err(FrameError::Oversized {
            len: body.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    let mut frame = Vec::with_capacity(HEADER_BYTES + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame reassembler for one connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete frame body, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if self.buffer.len() < HEADER_BYTES {
            return Ok(None);
        }
        let len = u32::from_le_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(FrameError::Oversized {
                len,
                max: MAX_FRAME_BYTES,
            });
        }
        if self.buffer.len() < HEADER_BYTES + len {
            return Ok(None);
        }
        self.buffer.advance(HEADER_BYTES);
        let body = self.buffer.split_to(len);
        Ok(Some(body.to_vec()))
    }

    /// Called when the peer closes: any buffered bytes are a truncated
    /// frame.
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(FrameError::TruncatedFrame {
                buffered: self.buffer.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::message::kind;

    fn sample() -> IpcMessage {
        IpcMessage::new(
            kind::LOCATION_CHECK,
            "a",
            "framework",
            serde_json::json!({"location": "Chest", "instance": 1}),
        )
    }

    #[test]
    fn roundtrip_single_frame() {
        let frame = encode_frame(&sample()).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame);
        let body = decoder.next_frame().unwrap().unwrap();
        let msg: IpcMessage = serde_json::from_slice(&body).unwrap();
        assert_eq!(msg, sample());
        assert!(decoder.next_frame().unwrap().is_none());
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn reassembles_across_any_chunking() {
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend_from_slice(&encode_frame(&sample()).unwrap());
        }

        // Feed the byte stream one byte at a time: worst-case chunking.
        let mut decoder = FrameDecoder::new();
        let mut seen = 0;
        for byte in &stream {
            decoder.extend(std::slice::from_ref(byte));
            while let Some(body) = decoder.next_frame().unwrap() {
                let msg: IpcMessage = serde_json::from_slice(&body).unwrap();
                assert_eq!(msg, sample());
                seen += 1;
            }
        }
        assert_eq!(seen, 3);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn split_header_is_not_a_frame() {
        let frame = encode_frame(&sample()).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame[..2]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&frame[2..]);
        assert!(decoder.next_frame().unwrap().is_some());
    }

    #[test]
    fn partial_body_at_close_is_truncation_not_phantom() {
        let frame = encode_frame(&sample()).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame[..frame.len() - 1]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(
            decoder.finish(),
            Err(FrameError::TruncatedFrame {
                buffered: frame.len() - 1
            })
        );
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&((MAX_FRAME_BYTES as u32) + 1).to_le_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(FrameError::Oversized { .. })
        ));
    }

    #[test]
    fn length_prefix_is_little_endian() {
        let frame = encode_frame(&sample()).unwrap();
        let body_len = frame.len() - 4;
        assert_eq!(
            u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize,
            body_len
        );
    }
}
