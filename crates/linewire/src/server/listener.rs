use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info};

#[cfg(unix)]
use std::path::PathBuf;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(not(unix))]
use crate::error::ConfigError;
use crate::error::ServerError;
use crate::server::auth::{AllowAll, Authenticator};
use crate::server::config::{ListenAddr, ServerConfig};
use crate::server::registry::SessionRegistry;
use crate::server::router::RouteTable;
use crate::server::session::{Session, SessionContext, SessionHandle};
use crate::server::tracker::TaskTracker;

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

/// An accepted connection.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Listener {
    /// Bind `addr`. A Unix socket file left behind by an earlier run is
    /// removed first.
    pub async fn bind(addr: &ListenAddr) -> Result<Self, ServerError> {
        let bind_err = |source: io::Error| ServerError::Bind {
            addr: addr.to_string(),
            source,
        };

        match addr {
            ListenAddr::Tcp(host) => {
                let listener = TcpListener::bind(host.as_str()).await.map_err(bind_err)?;
                Ok(Listener::Tcp(listener))
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!(path = %path.display(), "Removed stale socket file"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(bind_err(e)),
                }
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => Err(ConfigError::UnixUnsupported.into()),
        }
    }

    /// Wait for the next connection. Returns it with a description of the peer.
    pub async fn accept(&self) -> io::Result<(Connection, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Connection::Tcp(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix { listener, path } => {
                let (stream, peer) = listener.accept().await?;
                let peer = match peer.as_pathname() {
                    Some(peer) => format!("unix:{}", peer.display()),
                    None => format!("unix:{}", path.display()),
                };
                Ok((Connection::Unix(stream), peer))
            }
        }
    }

    /// The address actually bound. For TCP this carries the real port when
    /// port 0 was requested.
    pub fn local_addr(&self) -> io::Result<ListenAddr> {
        match self {
            Listener::Tcp(listener) => Ok(ListenAddr::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            Listener::Unix { path, .. } => Ok(ListenAddr::Unix(path.clone())),
        }
    }

    fn cleanup(&self) {
        match self {
            Listener::Tcp(_) => {}
            #[cfg(unix)]
            Listener::Unix { path, .. } => {
                if let Err(e) = std::fs::remove_file(path) {
                    debug!(path = %path.display(), error = %e, "Failed to remove socket file");
                }
            }
        }
    }
}

/// Runs sessions over any byte stream.
///
/// Owns the route table, the session registry, the authenticator and the
/// optional handler limit. [`Server`] feeds it accepted sockets; tests and
/// embedders can hand it any `AsyncRead + AsyncWrite` stream directly.
pub struct Service {
    routes: Arc<RouteTable>,
    registry: Arc<SessionRegistry>,
    authenticator: Arc<dyn Authenticator>,
    handler_permits: Option<Arc<Semaphore>>,
    shutdown: watch::Sender<bool>,
    sessions: TaskTracker,
}

impl Service {
    pub fn new(routes: RouteTable, registry: Arc<SessionRegistry>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            routes: Arc::new(routes),
            registry,
            authenticator: Arc::new(AllowAll),
            handler_permits: None,
            shutdown,
            sessions: TaskTracker::new(),
        }
    }

    /// Check every new session with `authenticator` before serving it.
    pub fn with_authenticator<A: Authenticator>(mut self, authenticator: A) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Allow at most `limit` handlers to run at once across all sessions.
    /// Requests over the limit wait for a slot; reading is never blocked.
    pub fn with_handler_limit(mut self, limit: usize) -> Self {
        self.handler_permits = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    /// Start a session on `stream`.
    pub fn connect<S>(&self, stream: S, peer: impl Into<String>) -> SessionHandle
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let ctx = Arc::new(SessionContext {
            routes: Arc::clone(&self.routes),
            registry: Arc::clone(&self.registry),
            authenticator: Arc::clone(&self.authenticator),
            handler_permits: self.handler_permits.clone(),
            shutdown: self.shutdown.subscribe(),
        });
        Session::spawn(stream, peer.into(), ctx, self.sessions.track())
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Sessions started and not yet closed, including ones still draining.
    pub fn active_sessions(&self) -> usize {
        self.sessions.active()
    }

    /// Stop every session and wait until all of them are closed.
    ///
    /// Sessions stop reading at once; handlers already dispatched run to
    /// completion and may still answer.
    pub async fn shutdown(self) {
        info!(sessions = self.sessions.active(), "Shutting down sessions");
        self.shutdown.send_replace(true);
        self.sessions.wait().await;
        info!("All sessions closed");
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("routes", &self.routes.len())
            .field("registry", &self.registry)
            .field("active_sessions", &self.sessions.active())
            .finish()
    }
}

/// Accepts connections and runs a session for each.
#[derive(Debug)]
pub struct Server {
    listener: Listener,
    service: Service,
}

impl Server {
    pub async fn bind(config: &ServerConfig, mut service: Service) -> Result<Self, ServerError> {
        if let Some(limit) = config.max_concurrent_handlers {
            service = service.with_handler_limit(limit);
        }
        let listener = Listener::bind(&config.listen).await?;
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> io::Result<ListenAddr> {
        self.listener.local_addr()
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Accept connections until accepting fails.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves or accepting fails,
    /// then stop every session and wait for them to close.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server { listener, service } = self;
        tokio::pin!(shutdown);

        match listener.local_addr() {
            Ok(addr) => info!(%addr, routes = service.routes().len(), "Listening"),
            Err(e) => debug!(error = %e, "Listening on an unknown address"),
        }

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((Connection::Tcp(stream), peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        service.connect(stream, peer);
                    }
                    #[cfg(unix)]
                    Ok((Connection::Unix(stream), peer)) => {
                        service.connect(stream, peer);
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed, no longer accepting");
                        break Err(ServerError::Accept(e));
                    }
                },
            }
        };

        service.shutdown().await;
        listener.cleanup();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::message::Request;
    use crate::server::session::SessionState;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_bind_ephemeral_tcp_port() {
        let config = ServerConfig::builder()
            .listen("127.0.0.1:0".parse().unwrap())
            .build();
        let service = Service::new(RouteTable::new(), Arc::new(SessionRegistry::new()));
        let server = Server::bind(&config, service).await.unwrap();

        let ListenAddr::Tcp(addr) = server.local_addr().unwrap() else {
            panic!("expected a TCP address");
        };
        assert!(!addr.ends_with(":0"));
    }

    #[tokio::test]
    async fn test_bind_failure_reports_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = ListenAddr::Tcp(taken.local_addr().unwrap().to_string());

        let err = Listener::bind(&addr).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(err.to_string().contains(&addr.to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_sessions() {
        let mut routes = RouteTable::new();
        routes
            .get("v1", "/slow", |_request, responder| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                responder.send(200, json!("late")).await?;
                Ok::<(), BoxError>(())
            })
            .unwrap();
        let service = Service::new(routes, Arc::new(SessionRegistry::new()));

        let (ours, theirs) = tokio::io::duplex(4096);
        let handle = service.connect(ours, "duplex");
        let mut state = handle.watch_state();
        let (read, mut write) = tokio::io::split(theirs);
        let mut frames = crate::framing::FrameReader::<_, crate::message::Response>::new(read);

        let frame = crate::framing::encode_frame(&Request::new("GET", "/v1/slow")).unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut write, &frame).await.unwrap();
        // Let the request reach its handler before shutting down.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(service.active_sessions(), 1);
        timeout(Duration::from_secs(5), service.shutdown()).await.unwrap();

        assert_eq!(*state.borrow_and_update(), SessionState::Closed);
        let response = frames.next_message().await.unwrap().unwrap();
        assert_eq!(response.data, json!("late"));
        assert!(frames.next_message().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_listener_replaces_stale_socket() {
        let path = std::env::temp_dir().join(format!("linewire-{}.sock", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"stale").unwrap();

        let listener = Listener::bind(&ListenAddr::Unix(path.clone())).await.unwrap();
        assert_eq!(listener.local_addr().unwrap(), ListenAddr::Unix(path.clone()));

        let _client = UnixStream::connect(&path).await.unwrap();
        let (connection, peer) = listener.accept().await.unwrap();
        assert!(matches!(connection, Connection::Unix(_)));
        assert!(peer.starts_with("unix:"));

        listener.cleanup();
        assert!(!path.exists());
    }
}
