//! Connection event loop.
//!
//! One task owns the socket. It turns readiness and errors into
//! [`ConnectionEvent`]s and drives the [`Framer`]; it never waits on
//! anything a caller holds.

use std::fmt;
use std::sync::Arc;

use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ConnectionErrorKind, SessionError, SessionResult};
use crate::protocol::{Framer, ReadOutcome, WriteOutcome};
use crate::registry::RequestRegistry;

/// Why an open session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The peer closed the stream.
    PeerClosed,
    ReadFailed(String),
    WriteFailed(String),
    /// The peer sent something the framer cannot recover from.
    Protocol(String),
}

impl EndReason {
    fn from_error(error: &SessionError) -> Self {
        match error {
            SessionError::Connection {
                kind: ConnectionErrorKind::WriteFailed { message },
            } => EndReason::WriteFailed(message.clone()),
            SessionError::Connection {
                kind: ConnectionErrorKind::ReadFailed { message },
            } => EndReason::ReadFailed(message.clone()),
            SessionError::Connection {
                kind: ConnectionErrorKind::Ended,
            } => EndReason::PeerClosed,
            SessionError::Protocol { kind } => EndReason::Protocol(kind.to_string()),
            other => EndReason::ReadFailed(other.to_string()),
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::PeerClosed => write!(f, "peer closed the stream"),
            EndReason::ReadFailed(message) => write!(f, "read failed: {}", message),
            EndReason::WriteFailed(message) => write!(f, "write failed: {}", message),
            EndReason::Protocol(message) => write!(f, "protocol violation: {}", message),
        }
    }
}

/// Lifecycle signals emitted by the connection task.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    Opened,
    OpenFailed(SessionError),
    Ended(EndReason),
    DataReceived(Vec<u8>),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Tracks the two stream directions until both have opened.
#[derive(Debug, Default)]
pub(crate) struct OpenTracker {
    read_open: bool,
    write_open: bool,
    opened: bool,
}

impl OpenTracker {
    /// Record that `direction` is open. Returns `true` exactly once: on the
    /// call that completes the pair.
    pub(crate) fn mark_open(&mut self, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.read_open = true,
            Direction::Write => self.write_open = true,
        }
        if !self.opened && self.read_open && self.write_open {
            self.opened = true;
            return true;
        }
        false
    }

    /// Classify a transport failure: before open it fails the open,
    /// afterwards it ends the session.
    pub(crate) fn failure(&self, error: SessionError) -> ConnectionEvent {
        if self.opened {
            ConnectionEvent::Ended(EndReason::from_error(&error))
        } else {
            ConnectionEvent::OpenFailed(error)
        }
    }
}

/// Owner of one TCP stream.
pub(crate) struct Connection {
    session_id: Uuid,
    settings: Arc<Settings>,
    registry: Arc<RequestRegistry>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: Arc<Notify>,
    tracker: OpenTracker,
}

impl Connection {
    pub(crate) fn new(
        session_id: Uuid,
        settings: Arc<Settings>,
        registry: Arc<RequestRegistry>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            session_id,
            settings,
            registry,
            events,
            shutdown,
            tracker: OpenTracker::default(),
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // Receiver gone means the session was dropped
        let _ = self.events.send(event);
    }

    /// Connect, then drive the stream until it ends or shutdown is signalled.
    pub(crate) async fn run(mut self) {
        let shutdown = Arc::clone(&self.shutdown);

        let opened = tokio::select! {
            _ = shutdown.notified() => None,
            result = self.open() => Some(result),
        };

        let stream = match opened {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "Failed to open session");
                let event = self.tracker.failure(e);
                self.emit(event);
                return;
            }
            None => {
                debug!(session_id = %self.session_id, "Shutdown before open");
                return;
            }
        };

        self.drive(&stream, &shutdown).await;
        debug!(session_id = %self.session_id, "Connection task finished");
    }

    async fn open(&mut self) -> SessionResult<TcpStream> {
        let config = &self.settings.connection;
        let host = config.host.as_str();
        let port = config.port;

        let stream = timeout(config.connect_timeout(), TcpStream::connect((host, port)))
            .await
            .map_err(|_| SessionError::Connection {
                kind: ConnectionErrorKind::ConnectTimeout {
                    timeout_ms: config.connect_timeout_ms,
                },
            })?
            .map_err(|e| SessionError::Connection {
                kind: ConnectionErrorKind::OpenFailed {
                    message: format!("{}:{}: {}", host, port, e),
                },
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        // An established connection can be read from; the write side is
        // open once the socket first reports writable.
        self.tracker.mark_open(Direction::Read);
        stream.writable().await.map_err(|e| SessionError::Connection {
            kind: ConnectionErrorKind::OpenFailed {
                message: e.to_string(),
            },
        })?;

        if self.tracker.mark_open(Direction::Write) {
            info!(session_id = %self.session_id, host, port, "Session opened");
            self.emit(ConnectionEvent::Opened);
        }

        Ok(stream)
    }

    async fn drive(&self, stream: &TcpStream, shutdown: &Notify) {
        let limits = &self.settings.limits;
        let mut framer = Framer::new(limits.max_message_size, limits.read_buffer_size);

        loop {
            let wants_write = framer.has_pending_write() || self.registry.has_outbound();
            let interest = if wants_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };

            tokio::select! {
                _ = shutdown.notified() => {
                    debug!(session_id = %self.session_id, "Shutdown requested");
                    return;
                }
                _ = self.registry.outbound_ready(), if !wants_write => {}
                ready = stream.ready(interest) => {
                    let ready = match ready {
                        Ok(ready) => ready,
                        Err(e) => {
                            warn!(session_id = %self.session_id, error = %e, "Socket readiness failed");
                            self.emit(self.tracker.failure(SessionError::Io(e)));
                            return;
                        }
                    };

                    if (ready.is_readable() || ready.is_read_closed())
                        && !self.on_readable(&mut framer, stream)
                    {
                        return;
                    }

                    if ready.is_writable() && !self.on_writable(&mut framer, stream) {
                        return;
                    }
                }
            }
        }
    }

    /// Framer read step. Returns `false` once the stream is finished.
    fn on_readable(&self, framer: &mut Framer, stream: &TcpStream) -> bool {
        match framer.read_step(stream) {
            Ok(ReadOutcome::Frames(frames)) => {
                for frame in frames {
                    self.emit(ConnectionEvent::DataReceived(frame));
                }
                true
            }
            Ok(ReadOutcome::Pending) => true,
            Ok(ReadOutcome::Ended) => {
                info!(session_id = %self.session_id, "Peer closed the stream");
                self.emit(ConnectionEvent::Ended(EndReason::PeerClosed));
                false
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Read failed");
                self.emit(self.tracker.failure(e));
                false
            }
        }
    }

    /// Framer write step. Returns `false` once the stream is finished.
    fn on_writable(&self, framer: &mut Framer, stream: &TcpStream) -> bool {
        match framer.write_step(stream, || self.registry.next_to_send()) {
            Ok(WriteOutcome::Ended) => {
                info!(session_id = %self.session_id, "Stream accepted no bytes, disconnected");
                self.emit(ConnectionEvent::Ended(EndReason::PeerClosed));
                false
            }
            Ok(WriteOutcome::FrameWritten) => {
                debug!(session_id = %self.session_id, "Frame written");
                true
            }
            Ok(_) => true,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Write failed");
                self.emit(self.tracker.failure(e));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolErrorKind;

    #[test]
    fn test_opened_fires_once_after_both_directions() {
        let mut tracker = OpenTracker::default();
        assert!(!tracker.mark_open(Direction::Write));
        assert!(!tracker.opened);
        assert!(tracker.mark_open(Direction::Read));
        assert!(tracker.opened);
        assert!(!tracker.mark_open(Direction::Read));
        assert!(!tracker.mark_open(Direction::Write));
    }

    #[test]
    fn test_failure_before_open_is_open_failure() {
        let mut tracker = OpenTracker::default();
        tracker.mark_open(Direction::Read);
        let event = tracker.failure(SessionError::Connection {
            kind: ConnectionErrorKind::OpenFailed {
                message: "refused".to_string(),
            },
        });
        assert!(matches!(event, ConnectionEvent::OpenFailed(_)));
    }

    #[test]
    fn test_failure_after_open_ends_session() {
        let mut tracker = OpenTracker::default();
        tracker.mark_open(Direction::Read);
        tracker.mark_open(Direction::Write);

        let event = tracker.failure(SessionError::Connection {
            kind: ConnectionErrorKind::WriteFailed {
                message: "broken pipe".to_string(),
            },
        });
        assert!(matches!(
            event,
            ConnectionEvent::Ended(EndReason::WriteFailed(ref m)) if m == "broken pipe"
        ));

        let event = tracker.failure(SessionError::Protocol {
            kind: ProtocolErrorKind::MessageTooLarge { size: 9, max: 8 },
        });
        assert!(matches!(event, ConnectionEvent::Ended(EndReason::Protocol(_))));
    }
}
