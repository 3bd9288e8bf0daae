//! Wire format for message framing.
//!
//! Messages are length-prefixed: [4 bytes big-endian u32][payload]
//!
//! [`FrameDecoder`] and [`OutboundFrame`] carry partial progress across
//! readiness events.

use crate::error::{ProtocolErrorKind, SessionError};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Maximum message size (1 MB by default, can be overridden).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Prepend the big-endian length prefix to a payload.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, SessionError> {
    let len = u32::try_from(payload.len()).map_err(|_| SessionError::Protocol {
        kind: ProtocolErrorKind::MessageTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        },
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

#[derive(Debug)]
enum DecodeState {
    /// Accumulating the 4-byte length prefix.
    Header { buf: [u8; HEADER_LEN], filled: usize },
    /// Accumulating `expected` payload bytes.
    Payload { expected: usize, buf: Vec<u8> },
}

impl DecodeState {
    fn header() -> Self {
        DecodeState::Header {
            buf: [0u8; HEADER_LEN],
            filled: 0,
        }
    }
}

/// Incremental decoder turning an arbitrary chunking of the byte stream
/// back into whole payloads.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    max_size: usize,
}

impl FrameDecoder {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: DecodeState::header(),
            max_size,
        }
    }

    /// Feed one chunk of bytes, returning every payload it completes.
    ///
    /// Bytes belonging to a frame that is still incomplete are retained for
    /// the next call. A declared length above the limit is an error; the
    /// decoder is left reset, but the stream itself is no longer in sync.
    pub fn feed(&mut self, mut chunk: &[u8]) -> Result<Vec<Vec<u8>>, SessionError> {
        let mut frames = Vec::new();

        loop {
            match &mut self.state {
                DecodeState::Header { buf, filled } => {
                    if chunk.is_empty() {
                        break;
                    }
                    let take = (HEADER_LEN - *filled).min(chunk.len());
                    buf[*filled..*filled + take].copy_from_slice(&chunk[..take]);
                    *filled += take;
                    chunk = &chunk[take..];

                    if *filled < HEADER_LEN {
                        break;
                    }

                    let len = u32::from_be_bytes(*buf) as usize;
                    if len > self.max_size {
                        self.state = DecodeState::header();
                        return Err(SessionError::Protocol {
                            kind: ProtocolErrorKind::MessageTooLarge {
                                size: len,
                                max: self.max_size,
                            },
                        });
                    }

                    self.state = DecodeState::Payload {
                        expected: len,
                        buf: Vec::with_capacity(len),
                    };
                }
                DecodeState::Payload { expected, buf } => {
                    let take = (*expected - buf.len()).min(chunk.len());
                    buf.extend_from_slice(&chunk[..take]);
                    chunk = &chunk[take..];

                    if buf.len() < *expected {
                        break;
                    }

                    if let DecodeState::Payload { buf, .. } =
                        std::mem::replace(&mut self.state, DecodeState::header())
                    {
                        frames.push(buf);
                    }
                }
            }
        }

        Ok(frames)
    }

    /// Whether a frame is partially accumulated.
    pub fn is_mid_frame(&self) -> bool {
        match &self.state {
            DecodeState::Header { filled, .. } => *filled > 0,
            DecodeState::Payload { .. } => true,
        }
    }
}

/// A framed outbound message and how much of it has reached the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    bytes: Vec<u8>,
    written: usize,
}

impl OutboundFrame {
    pub fn new(payload: &[u8]) -> Result<Self, SessionError> {
        Ok(Self {
            bytes: encode_frame(payload)?,
            written: 0,
        })
    }

    /// Bytes not yet accepted by the transport.
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.written..]
    }

    /// Record that the transport accepted `n` more bytes.
    pub fn advance(&mut self, n: usize) {
        self.written = (self.written + n).min(self.bytes.len());
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.written == self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_survives_any_chunking() {
        let payloads: Vec<Vec<u8>> = vec![
            Vec::new(),
            b"{}".to_vec(),
            br#"{"id":"1","result":"pong"}"#.to_vec(),
            vec![b'x'; 300],
        ];
        let mut stream = Vec::new();
        for payload in &payloads {
            stream.extend(encode_frame(payload).unwrap());
        }

        for chunk_size in [1, 2, 3, 4, 5, 7, 64, stream.len()] {
            let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
            let mut decoded = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                decoded.extend(decoder.feed(chunk).unwrap());
            }
            assert_eq!(decoded, payloads, "chunk size {}", chunk_size);
            assert!(!decoder.is_mid_frame());
        }
    }

    #[test]
    fn test_decoder_keeps_partial_header() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        assert!(decoder.feed(&[0, 0]).unwrap().is_empty());
        assert!(decoder.is_mid_frame());
        assert!(decoder.feed(&[0, 2, b'o']).unwrap().is_empty());
        assert_eq!(decoder.feed(&[b'k']).unwrap(), vec![b"ok".to_vec()]);
    }

    #[test]
    fn test_decoder_rejects_oversized_length() {
        let mut decoder = FrameDecoder::new(8);
        let result = decoder.feed(&16u32.to_be_bytes());
        assert!(matches!(
            result,
            Err(SessionError::Protocol {
                kind: ProtocolErrorKind::MessageTooLarge { size: 16, max: 8 }
            })
        ));
        assert!(!decoder.is_mid_frame());
    }

    #[test]
    fn test_outbound_frame_tracks_partial_writes() {
        let mut frame = OutboundFrame::new(b"abc").unwrap();
        assert_eq!(frame.len(), 7);
        assert_eq!(frame.remaining(), &[0, 0, 0, 3, b'a', b'b', b'c']);

        frame.advance(5);
        assert_eq!(frame.written(), 5);
        assert_eq!(frame.remaining(), b"bc");
        assert!(!frame.is_complete());

        frame.advance(2);
        assert!(frame.is_complete());
        assert!(frame.remaining().is_empty());
    }
}
