use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::error::RouteError;
use crate::message::Request;
use crate::path::{RoutePattern, full_path};
use crate::server::handler::{HandlerFn, HandlerResult, Responder, make_handler};

/// A registered `(method, URL template) -> handler` binding.
pub struct Route {
    method: String,
    version: String,
    pattern: RoutePattern,
    handler: HandlerFn,
}

impl Route {
    /// Lowercased method token.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Full URL template, e.g. `/v1/users/:id`.
    pub fn url(&self) -> &str {
        self.pattern.template()
    }

    pub fn params(&self) -> &[String] {
        self.pattern.params()
    }

    /// Case-insensitive structural match on method and whole URL.
    pub fn matches(&self, method: &str, url: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && self.pattern.is_match(url)
    }

    pub(crate) fn handler(&self) -> HandlerFn {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("url", &self.url())
            .field("params", &self.params())
            .finish()
    }
}

/// The routing table.
///
/// Routes are kept ordered by descending parameter count, so the first
/// structural match is also the one with the most parameters. Routes with
/// the same count keep registration order.
///
/// Populate the table before handing it to a [`Service`](crate::server::Service);
/// it is shared read-only from then on.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler for `method` at `/{version}{template}`.
    ///
    /// # Example
    /// ```ignore
    /// routes.register("get", "v1", "/users/:id", |request, responder| async move {
    ///     let id = request.param("id").unwrap_or_default().to_owned();
    ///     responder.send(200, serde_json::json!({ "id": id })).await?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn register<F, Fut>(
        &mut self,
        method: &str,
        version: &str,
        template: &str,
        handler: F,
    ) -> Result<(), RouteError>
    where
        F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_route(method, version, template, make_handler(handler))
    }

    /// Register an already boxed handler.
    pub fn register_route(
        &mut self,
        method: &str,
        version: &str,
        template: &str,
        handler: HandlerFn,
    ) -> Result<(), RouteError> {
        let pattern = RoutePattern::compile(&full_path(version, template))?;
        let route = Route {
            method: method.to_ascii_lowercase(),
            version: version.to_owned(),
            pattern,
            handler,
        };

        info!(
            method = %route.method,
            url = %route.url(),
            params = ?route.params(),
            "Registered route"
        );

        self.routes.push(route);
        self.routes.sort_by(|a, b| b.params().len().cmp(&a.params().len()));
        Ok(())
    }

    pub fn get<F, Fut>(&mut self, version: &str, template: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register("get", version, template, handler)
    }

    pub fn post<F, Fut>(&mut self, version: &str, template: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register("post", version, template, handler)
    }

    pub fn put<F, Fut>(&mut self, version: &str, template: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register("put", version, template, handler)
    }

    pub fn patch<F, Fut>(&mut self, version: &str, template: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register("patch", version, template, handler)
    }

    pub fn delete<F, Fut>(
        &mut self,
        version: &str,
        template: &str,
        handler: F,
    ) -> Result<(), RouteError>
    where
        F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register("delete", version, template, handler)
    }

    /// First route, in table order, matching `method` and `url`.
    pub fn find(&self, method: &str, url: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(method, url))
    }

    /// Find the route for `request` and bind its path parameters.
    pub fn resolve(&self, request: &mut Request) -> Option<&Route> {
        let route = self.find(&request.method, &request.url)?;
        if let Some(params) = route.pattern.bind(&request.url) {
            request.params = params;
        }
        Some(route)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
