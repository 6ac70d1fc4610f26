use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify, Semaphore, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::error::SendError;
use crate::framing::{FrameReader, encode_frame};
use crate::message::{Request, Response};
use crate::server::auth::Authenticator;
use crate::server::handler::dispatch;
use crate::server::registry::SessionRegistry;
use crate::server::router::RouteTable;
use crate::server::tracker::{TaskGuard, TaskTracker};

/// Identifies one accepted connection for as long as it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a session.
///
/// `Accepted → Authenticating → Serving → Draining → Closed`, or straight
/// from `Authenticating` to `Closed` when authentication fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Authenticating,
    /// Reading frames and dispatching requests.
    Serving,
    /// No longer reading; waiting for dispatched handlers to finish.
    Draining,
    /// Connection released. Final.
    Closed,
}

/// What the authenticator and registry know about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    /// Remote address, or a description of the transport when there is none.
    pub peer: String,
}

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// The write half of a session's connection.
///
/// Any number of tasks may write concurrently. Each frame is written whole
/// under a lock, so frames never interleave; the order between frames from
/// different tasks is whatever order they take the lock in.
pub struct SessionWriter {
    id: SessionId,
    inner: Mutex<Option<BoxedWrite>>,
}

impl SessionWriter {
    pub(crate) fn new<W>(id: SessionId, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            inner: Mutex::new(Some(Box::new(writer))),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.id
    }

    /// Encode and write one response.
    ///
    /// Returns the number of bytes written. A response that cannot be encoded
    /// is logged and counts as nothing sent: `Ok(0)`.
    pub async fn write_response(&self, response: &Response) -> Result<usize, SendError> {
        match encode_frame(response) {
            Ok(frame) => self.write_frame(&frame).await,
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "Failed to encode response, nothing sent");
                Ok(0)
            }
        }
    }

    /// Write one already encoded frame in a single locked call.
    pub async fn write_frame(&self, frame: &[u8]) -> Result<usize, SendError> {
        let mut inner = self.inner.lock().await;
        let writer = inner.as_mut().ok_or(SendError::Closed)?;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(frame.len())
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }

    /// Shut the connection down. Later writes fail with [`SendError::Closed`].
    pub(crate) async fn close(&self) {
        let writer = self.inner.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(session_id = %self.id, error = %e, "Error shutting down connection");
            }
        }
    }
}

impl fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionWriter").field("id", &self.id).finish()
    }
}

/// Shared, read-only state every session of a service needs.
pub(crate) struct SessionContext {
    pub routes: Arc<RouteTable>,
    pub registry: Arc<SessionRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    pub handler_permits: Option<Arc<Semaphore>>,
    pub shutdown: watch::Receiver<bool>,
}

/// Handle to a running session.
///
/// Dropping the handle does not stop the session.
#[derive(Debug)]
pub struct SessionHandle {
    info: SessionInfo,
    state: watch::Receiver<SessionState>,
    disconnect: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.info.id
    }

    pub fn peer(&self) -> &str {
        &self.info.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Ask the session to stop reading. In-flight handlers still finish.
    pub fn disconnect(&self) {
        self.disconnect.notify_one();
    }

    /// Wait until the session is closed and its handlers have drained.
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}

/// One accepted connection: authenticate, then read, route and dispatch
/// frames until the stream ends.
pub(crate) struct Session<S> {
    info: SessionInfo,
    stream: S,
    ctx: Arc<SessionContext>,
    state: watch::Sender<SessionState>,
    disconnect: Arc<Notify>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Spawn a session task for `stream`.
    ///
    /// `guard` is held until the session is fully closed.
    pub(crate) fn spawn(
        stream: S,
        peer: String,
        ctx: Arc<SessionContext>,
        guard: TaskGuard,
    ) -> SessionHandle {
        let info = SessionInfo {
            id: SessionId::new(),
            peer,
        };
        let (state, state_rx) = watch::channel(SessionState::Accepted);
        let disconnect = Arc::new(Notify::new());

        let session = Session {
            info: info.clone(),
            stream,
            ctx,
            state,
            disconnect: Arc::clone(&disconnect),
        };

        let span = info_span!("session", id = %info.id, peer = %info.peer);
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                session.run().await;
            }
            .instrument(span),
        );

        SessionHandle {
            info,
            state: state_rx,
            disconnect,
            task,
        }
    }

    async fn run(self) {
        let Session {
            info,
            mut stream,
            ctx,
            state,
            disconnect,
        } = self;

        info!("Accepted connection");
        state.send_replace(SessionState::Authenticating);

        if let Err(err) = ctx.authenticator.authenticate(&info) {
            warn!(error = %err, "Authentication failed, closing connection");
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Error shutting down connection");
            }
            state.send_replace(SessionState::Closed);
            return;
        }
        debug!("Authenticated");

        let (read_half, write_half) = tokio::io::split(stream);
        let writer = Arc::new(SessionWriter::new(info.id, write_half));

        let registration =
            match ctx
                .registry
                .register(info.clone(), Arc::clone(&writer), Arc::clone(&disconnect))
            {
                Ok(registration) => registration,
                Err(err) => {
                    warn!(error = %err, "Failed to register session");
                    writer.close().await;
                    state.send_replace(SessionState::Closed);
                    return;
                }
            };

        state.send_replace(SessionState::Serving);

        let mut frames = FrameReader::<_, Request>::new(read_half);
        let handlers = TaskTracker::new();
        let mut shutdown = ctx.shutdown.clone();

        loop {
            let next = tokio::select! {
                next = frames.next_message() => next,
                _ = disconnect.notified() => {
                    info!("Disconnect requested");
                    break;
                }
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Server shutting down");
                    break;
                }
            };

            match next {
                Some(Ok(request)) => Self::spawn_dispatch(&ctx, &writer, &handlers, request),
                Some(Err(err)) if err.is_fatal() => {
                    warn!(error = %err, "Read failed, closing session");
                    break;
                }
                Some(Err(err)) => warn!(error = %err, "Dropping malformed frame"),
                None => {
                    debug!("End of stream");
                    break;
                }
            }
        }

        drop(registration);
        state.send_replace(SessionState::Draining);
        debug!(in_flight = handlers.active(), "Waiting for handlers to finish");
        handlers.wait().await;

        writer.close().await;
        state.send_replace(SessionState::Closed);
        info!("Disconnected");
    }

    /// Run routing and the handler on their own task so the read loop can
    /// go straight back to the connection.
    fn spawn_dispatch(
        ctx: &Arc<SessionContext>,
        writer: &Arc<SessionWriter>,
        handlers: &TaskTracker,
        request: Request,
    ) {
        debug!(
            method = %request.method,
            url = %request.url,
            request_id = %request.request_id,
            "Dispatching request"
        );

        let guard = handlers.track();
        let ctx = Arc::clone(ctx);
        let writer = Arc::clone(writer);

        tokio::spawn(
            async move {
                let _guard = guard;
                let _permit = match &ctx.handler_permits {
                    Some(permits) => Arc::clone(permits).acquire_owned().await.ok(),
                    None => None,
                };
                dispatch(&ctx.routes, writer, request).await;
            }
            .in_current_span(),
        );
    }
}

/// Resolves once the service signals shutdown. Never resolves if the
/// service is gone without signalling.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
