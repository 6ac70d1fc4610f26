use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{BoxError, SendError};
use crate::message::{REQUEST_RESPONSE_TYPE, Request, Response};
use crate::server::router::RouteTable;
use crate::server::session::{SessionId, SessionWriter};

/// What a route handler resolves to. Errors are logged by the server and
/// otherwise ignored; reporting them to the client is up to the handler.
pub type HandlerResult = Result<(), BoxError>;

/// A type-erased route handler.
///
/// The handler receives:
/// - `request`: the decoded request with `params` bound from the URL
/// - `responder`: a sink that writes responses back to the calling session
///
/// It may send zero or more responses before completing.
pub type HandlerFn =
    Arc<dyn Fn(Request, Responder) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static>;

/// Helper to create a boxed handler from an async closure.
pub fn make_handler<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |request: Request, responder: Responder| {
        f(request, responder).boxed()
    })
}

/// Response sink bound to one session, one route URL and one request id.
///
/// Cloning is cheap; every clone writes to the same connection.
#[derive(Clone)]
pub struct Responder {
    writer: Arc<SessionWriter>,
    url: String,
    request_id: String,
}

impl Responder {
    pub(crate) fn new(
        writer: Arc<SessionWriter>,
        url: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            writer,
            url: url.into(),
            request_id: request_id.into(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.writer.session_id()
    }

    /// URL template of the route this responder answers for.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Send `data` with status `code`.
    ///
    /// Returns the number of bytes written. If `data` cannot be represented as
    /// JSON nothing is sent and `Ok(0)` is returned.
    pub async fn send<D: Serialize>(&self, code: i32, data: D) -> Result<usize, SendError> {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(err) => {
                warn!(
                    url = %self.url,
                    request_id = %self.request_id,
                    error = %err,
                    "Failed to encode response data, nothing sent"
                );
                return Ok(0);
            }
        };
        self.send_response(Response {
            code,
            data,
            ..Default::default()
        })
        .await
    }

    /// Send a prepared response. Its type, URL and request id are replaced
    /// by the values this responder is bound to.
    pub async fn send_response(&self, mut response: Response) -> Result<usize, SendError> {
        response.kind = REQUEST_RESPONSE_TYPE.to_owned();
        response.url = self.url.clone();
        response.request_id = self.request_id.clone();
        self.writer.write_response(&response).await
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("session_id", &self.writer.session_id())
            .field("url", &self.url)
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Route one request and run its handler to completion.
///
/// Unmatched requests get a 404 written straight back to the session.
pub(crate) async fn dispatch(routes: &RouteTable, writer: Arc<SessionWriter>, mut request: Request) {
    let Some(route) = routes.resolve(&mut request) else {
        debug!(
            method = %request.method,
            url = %request.url,
            request_id = %request.request_id,
            "No route matched"
        );
        if let Err(e) = writer.write_response(&Response::not_found(&request)).await {
            warn!(url = %request.url, error = %e, "Failed to send not-found response");
        }
        return;
    };

    let handler = route.handler();
    let responder = Responder::new(writer, route.url(), request.request_id.as_str());
    let request_id = request.request_id.clone();

    match handler(request, responder).await {
        Ok(()) => debug!(route = %route.url(), request_id = %request_id, "Handler completed"),
        Err(err) => debug!(
            route = %route.url(),
            request_id = %request_id,
            error = %err,
            "Handler returned an error"
        ),
    }
}
