//! Session owner object.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ConnectionErrorKind, RequestError, SessionError, SessionResult};
use crate::protocol::{routing_key, Request};
use crate::registry::{CompletionHandle, NotificationHandler, RequestRegistry, Resolution};

use super::connection::{Connection, ConnectionEvent, EndReason};

const EVENT_CAPACITY: usize = 16;

/// Lifecycle notifications broadcast to [`Session::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Both stream directions are open.
    Opened,
    /// The peer went away. Pending requests have failed with
    /// [`RequestError::SessionEnded`].
    Ended { reason: EndReason },
    /// [`Session::close`] ran.
    Closed,
}

/// A client session over one TCP connection.
///
/// The session spawns two tasks: the connection task owns the socket and
/// the dispatch task applies its events to the registry. Dropping the
/// session closes it.
pub struct Session {
    id: Uuid,
    settings: Arc<Settings>,
    registry: Arc<RequestRegistry>,
    shutdown: Arc<Notify>,
    events: broadcast::Sender<SessionEvent>,
    /// Receiver created with the channel; it holds `Opened`.
    first_events: Mutex<Option<broadcast::Receiver<SessionEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Session {
    /// Connect to `host:port` with default settings.
    pub async fn open(host: impl Into<String>, port: u16) -> SessionResult<Self> {
        Self::connect(Settings::for_endpoint(host, port)).await
    }

    /// Connect with explicit settings.
    ///
    /// Resolves once the connection is open in both directions, or with
    /// the open failure.
    pub async fn connect(settings: Settings) -> SessionResult<Self> {
        settings.validate()?;

        let id = Uuid::new_v4();
        let settings = Arc::new(settings);
        let registry = Arc::new(RequestRegistry::from_settings(&settings));
        let shutdown = Arc::new(Notify::new());
        let (events, first_events) = broadcast::channel(EVENT_CAPACITY);
        let (connection_tx, connection_rx) = mpsc::unbounded_channel();
        let (open_tx, open_rx) = oneshot::channel();

        debug!(
            session_id = %id,
            host = %settings.connection.host,
            port = settings.connection.port,
            "Opening session"
        );

        let connection = Connection::new(
            id,
            Arc::clone(&settings),
            Arc::clone(&registry),
            connection_tx,
            Arc::clone(&shutdown),
        );
        let connection_task = tokio::spawn(connection.run());
        let dispatch_task = tokio::spawn(dispatch_events(
            id,
            Arc::clone(&registry),
            connection_rx,
            events.clone(),
            open_tx,
        ));

        // Built before waiting so that a cancelled connect still shuts the
        // tasks down through Drop.
        let session = Self {
            id,
            settings,
            registry,
            shutdown,
            events,
            first_events: Mutex::new(Some(first_events)),
            tasks: Mutex::new(vec![connection_task, dispatch_task]),
            closed: AtomicBool::new(false),
        };

        match open_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(SessionError::Connection {
                    kind: ConnectionErrorKind::Ended,
                })
            }
        }

        let sweep = session
            .registry
            .start_sweep_task(session.settings.requests.sweep_interval());
        session.lock_tasks().push(sweep);

        Ok(session)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Identifier used in this session's log records.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    /// Send `kind:method` with `args` under the next session id.
    pub fn request(&self, kind: &str, method: &str, args: Map<String, Value>) -> CompletionHandle {
        self.submit(Request::new(kind).method(method).args(args))
    }

    /// Submit a prepared request. An empty id is assigned by the session.
    pub fn submit(&self, request: Request) -> CompletionHandle {
        self.registry.submit(request)
    }

    /// Send a message that expects no reply.
    pub fn notify(&self, request: Request) -> Result<(), RequestError> {
        self.registry.enqueue_message(request)
    }

    /// Route notifications for `kind:method` to `handler`.
    pub fn add_handler<H>(&self, kind: &str, method: &str, handler: H)
    where
        H: NotificationHandler + 'static,
    {
        self.registry
            .add_handler(routing_key(kind, method), Arc::new(handler));
    }

    pub fn remove_handler(&self, kind: &str, method: &str) -> bool {
        self.registry.remove_handler(&routing_key(kind, method))
    }

    /// Receive lifecycle events.
    ///
    /// The first receiver handed out has seen every event since the
    /// session was created, starting with [`SessionEvent::Opened`]. Later
    /// receivers see events from the moment they subscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        let first = self
            .first_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        first.unwrap_or_else(|| self.events.subscribe())
    }

    pub fn is_open(&self) -> bool {
        self.registry.is_open()
    }

    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    /// Close the session. Every pending request fails with
    /// [`RequestError::SessionClosed`]; later submissions fail with
    /// [`RequestError::NotOpen`]. Calling it again does nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.registry.set_open(false);
        let failed = self.registry.invalidate_all(RequestError::SessionClosed);
        self.shutdown.notify_one();

        for task in self.lock_tasks().drain(..) {
            task.abort();
        }

        let _ = self.events.send(SessionEvent::Closed);
        info!(session_id = %self.id, failed, "Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.settings.connection.host)
            .field("port", &self.settings.connection.port)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Apply connection events to the registry, in arrival order.
async fn dispatch_events(
    session_id: Uuid,
    registry: Arc<RequestRegistry>,
    mut connection: mpsc::UnboundedReceiver<ConnectionEvent>,
    events: broadcast::Sender<SessionEvent>,
    open_tx: oneshot::Sender<SessionResult<()>>,
) {
    let mut open_tx = Some(open_tx);

    while let Some(event) = connection.recv().await {
        match event {
            ConnectionEvent::Opened => {
                registry.set_open(true);
                // Queued before connect resolves, so the first subscriber sees it
                let _ = events.send(SessionEvent::Opened);
                if let Some(tx) = open_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            ConnectionEvent::OpenFailed(error) => {
                if let Some(tx) = open_tx.take() {
                    let _ = tx.send(Err(error));
                }
            }
            ConnectionEvent::DataReceived(frame) => match registry.resolve(&frame) {
                Resolution::Dropped { reason } => {
                    warn!(session_id = %session_id, reason = %reason, "Inbound message dropped");
                }
                resolution => {
                    debug!(session_id = %session_id, ?resolution, "Inbound message resolved");
                }
            },
            ConnectionEvent::Ended(reason) => {
                registry.set_open(false);
                let failed = registry.invalidate_all(RequestError::SessionEnded);
                info!(session_id = %session_id, reason = %reason, failed, "Session ended");
                let _ = events.send(SessionEvent::Ended { reason });
            }
        }
    }
}
