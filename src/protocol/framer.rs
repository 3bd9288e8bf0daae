//! Readiness-driven framing over a non-blocking stream.
//!
//! The [`Framer`] performs one read or one write attempt per readiness
//! event and keeps partial frames in both directions between events.

use std::io;

use tokio::net::TcpStream;
use tracing::trace;

use crate::error::{ConnectionErrorKind, SessionError};

use super::wire::{FrameDecoder, OutboundFrame};

/// Non-blocking byte stream the framer drives.
///
/// Both calls must return `WouldBlock` instead of waiting.
pub trait RawStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl RawStream for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

/// Result of a single read step.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes arrived; zero or more frames completed.
    Frames(Vec<Vec<u8>>),
    /// Readiness was spurious.
    Pending,
    /// The peer closed its side of the stream.
    Ended,
}

/// Result of a single write step.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Nothing queued and nothing to send.
    Idle,
    /// Some bytes written, frame still incomplete.
    Partial { written: usize, total: usize },
    /// The last byte of a frame was written.
    FrameWritten,
    /// Readiness was spurious.
    Pending,
    /// The transport accepted zero bytes.
    Ended,
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Stateful framer for one connection.
#[derive(Debug)]
pub struct Framer {
    decoder: FrameDecoder,
    outbound: Option<OutboundFrame>,
    read_buf: Vec<u8>,
}

impl Framer {
    pub fn new(max_message_size: usize, read_buffer_size: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(max_message_size),
            outbound: None,
            read_buf: vec![0u8; read_buffer_size.max(1)],
        }
    }

    /// Whether a frame is staged and not yet fully written.
    pub fn has_pending_write(&self) -> bool {
        self.outbound.is_some()
    }

    /// Perform one read on a read-readiness event.
    pub fn read_step<S: RawStream + ?Sized>(
        &mut self,
        stream: &S,
    ) -> Result<ReadOutcome, SessionError> {
        let n = match stream.try_read(&mut self.read_buf) {
            Ok(0) => return Ok(ReadOutcome::Ended),
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(ReadOutcome::Pending),
            Err(e) => {
                return Err(SessionError::Connection {
                    kind: ConnectionErrorKind::ReadFailed {
                        message: e.to_string(),
                    },
                })
            }
        };

        trace!(bytes = n, "Read from stream");
        let frames = self.decoder.feed(&self.read_buf[..n])?;
        Ok(ReadOutcome::Frames(frames))
    }

    /// Perform one write on a write-readiness event.
    ///
    /// When nothing is staged, `next` is asked for the next payload to send.
    pub fn write_step<S, F>(&mut self, stream: &S, next: F) -> Result<WriteOutcome, SessionError>
    where
        S: RawStream + ?Sized,
        F: FnOnce() -> Option<Vec<u8>>,
    {
        if self.outbound.is_none() {
            match next() {
                Some(payload) => self.outbound = Some(OutboundFrame::new(&payload)?),
                None => return Ok(WriteOutcome::Idle),
            }
        }

        let Some(frame) = self.outbound.as_mut() else {
            return Ok(WriteOutcome::Idle);
        };

        match stream.try_write(frame.remaining()) {
            Ok(0) => Ok(WriteOutcome::Ended),
            Ok(n) => {
                frame.advance(n);
                if frame.is_complete() {
                    trace!(bytes = frame.len(), "Frame written");
                    self.outbound = None;
                    Ok(WriteOutcome::FrameWritten)
                } else {
                    trace!(written = frame.written(), total = frame.len(), "Partial write");
                    Ok(WriteOutcome::Partial {
                        written: frame.written(),
                        total: frame.len(),
                    })
                }
            }
            Err(e) if is_transient(&e) => Ok(WriteOutcome::Pending),
            Err(e) => Err(SessionError::Connection {
                kind: ConnectionErrorKind::WriteFailed {
                    message: e.to_string(),
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::encode_frame;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Scripted stream: each read yields the next queued result, each
    /// write accepts at most `write_limit` bytes.
    struct ScriptedStream {
        reads: RefCell<VecDeque<io::Result<Vec<u8>>>>,
        written: RefCell<Vec<u8>>,
        write_limit: usize,
    }

    impl ScriptedStream {
        fn new(write_limit: usize) -> Self {
            Self {
                reads: RefCell::new(VecDeque::new()),
                written: RefCell::new(Vec::new()),
                write_limit,
            }
        }

        fn push_read(&self, chunk: &[u8]) {
            self.reads.borrow_mut().push_back(Ok(chunk.to_vec()));
        }
    }

    impl RawStream for ScriptedStream {
        fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.borrow_mut().pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.write_limit);
            self.written.borrow_mut().extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }

    #[test]
    fn test_read_step_assembles_frame_across_events() {
        let stream = ScriptedStream::new(usize::MAX);
        let frame = encode_frame(br#"{"id":"1"}"#).unwrap();
        for byte in &frame {
            stream.push_read(&[*byte]);
        }

        let mut framer = Framer::new(1024, 64);
        let mut frames = Vec::new();
        for _ in 0..frame.len() {
            match framer.read_step(&stream).unwrap() {
                ReadOutcome::Frames(f) => frames.extend(f),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(frames, vec![br#"{"id":"1"}"#.to_vec()]);
        assert_eq!(framer.read_step(&stream).unwrap(), ReadOutcome::Pending);
    }

    #[test]
    fn test_read_step_reports_end_and_errors() {
        let stream = ScriptedStream::new(usize::MAX);
        stream.push_read(&[]);
        stream
            .reads
            .borrow_mut()
            .push_back(Err(io::ErrorKind::ConnectionReset.into()));

        let mut framer = Framer::new(1024, 64);
        assert_eq!(framer.read_step(&stream).unwrap(), ReadOutcome::Ended);
        assert!(matches!(
            framer.read_step(&stream),
            Err(SessionError::Connection {
                kind: ConnectionErrorKind::ReadFailed { .. }
            })
        ));
    }

    #[test]
    fn test_write_step_resumes_partial_writes() {
        let stream = ScriptedStream::new(3);
        let mut framer = Framer::new(1024, 64);

        let outcome = framer
            .write_step(&stream, || Some(b"hello".to_vec()))
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Partial { written: 3, total: 9 });
        assert!(framer.has_pending_write());

        // A staged frame is finished before asking for another payload.
        let outcome = framer
            .write_step(&stream, || panic!("must not ask while a frame is staged"))
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Partial { written: 6, total: 9 });

        let outcome = framer.write_step(&stream, || None).unwrap();
        assert_eq!(outcome, WriteOutcome::FrameWritten);
        assert!(!framer.has_pending_write());
        assert_eq!(*stream.written.borrow(), encode_frame(b"hello").unwrap());

        assert_eq!(framer.write_step(&stream, || None).unwrap(), WriteOutcome::Idle);
    }

    #[test]
    fn test_write_step_zero_bytes_is_end() {
        let stream = ScriptedStream::new(0);
        let mut framer = Framer::new(1024, 64);
        let outcome = framer.write_step(&stream, || Some(b"{}".to_vec())).unwrap();
        assert_eq!(outcome, WriteOutcome::Ended);
    }
}
