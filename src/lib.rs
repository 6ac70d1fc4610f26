use anyhow::{Context, Result};
use linewire::server::{ListenAddr, RouteTable, ServerConfig, SessionRegistry};
use linewire::{BoxError, Response, RouteError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const API_VERSION: &str = "v1";

/// Environment variable holding the listen (or connect) address.
pub const ADDR_ENV: &str = "LINEWIRE_ADDR";

/// Environment variable capping concurrently running handlers.
pub const MAX_HANDLERS_ENV: &str = "LINEWIRE_MAX_HANDLERS";

const DEFAULT_FILTER: &str = "linewire=debug,linewire_prototype=info";

/// Longest a `/sleep/:ms` request may wait.
const MAX_SLEEP: Duration = Duration::from_secs(30);

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Listen (or connect) address from the environment, or the default.
pub fn addr_from_env() -> Result<ListenAddr> {
    match std::env::var(ADDR_ENV) {
        Ok(addr) => addr
            .parse()
            .with_context(|| format!("{ADDR_ENV} is not a valid address")),
        Err(_) => Ok(ListenAddr::default()),
    }
}

pub fn config_from_env() -> Result<ServerConfig> {
    let max_handlers = match std::env::var(MAX_HANDLERS_ENV) {
        Ok(value) => Some(
            value
                .parse::<usize>()
                .with_context(|| format!("{MAX_HANDLERS_ENV} must be a positive integer"))?,
        ),
        Err(_) => None,
    };

    Ok(ServerConfig::builder()
        .listen(addr_from_env()?)
        .maybe_max_concurrent_handlers(max_handlers)
        .build())
}

/// The demo API.
///
/// `GET /v1/users/me` is registered but never reached: `/v1/users/:id` has
/// more parameters and is tried first, and answers with `id = "me"`.
pub fn demo_routes(registry: Arc<SessionRegistry>) -> Result<RouteTable, RouteError> {
    let mut routes = RouteTable::new();

    routes.get(API_VERSION, "/ping", |_request, responder| async move {
        responder
            .send(200, json!({ "pong": true, "session": responder.session_id().to_string() }))
            .await?;
        Ok::<(), BoxError>(())
    })?;

    routes.post(API_VERSION, "/echo", |request, responder| async move {
        responder
            .send(
                200,
                json!({ "body": request.body, "query": request.query, "headers": request.headers }),
            )
            .await?;
        Ok::<(), BoxError>(())
    })?;

    routes.get(API_VERSION, "/users/me", |_request, responder| async move {
        responder.send(200, json!({ "id": "me", "self": true })).await?;
        Ok::<(), BoxError>(())
    })?;

    routes.get(API_VERSION, "/users/:id", |request, responder| async move {
        let id = request.param("id").unwrap_or_default();
        responder.send(200, json!({ "id": id })).await?;
        Ok::<(), BoxError>(())
    })?;

    routes.get(API_VERSION, "/items/:category/:id", |request, responder| async move {
        responder
            .send(
                200,
                json!({
                    "category": request.param("category"),
                    "id": request.param("id"),
                    "query": request.query,
                }),
            )
            .await?;
        Ok::<(), BoxError>(())
    })?;

    routes.get(API_VERSION, "/sleep/:ms", |request, responder| async move {
        let ms = request.param("ms").unwrap_or_default();
        let Ok(ms) = ms.parse::<u64>() else {
            responder
                .send(400, json!({ "error": "BadRequest", "message": "ms must be an integer" }))
                .await?;
            return Ok(());
        };
        let delay = Duration::from_millis(ms).min(MAX_SLEEP);
        tokio::time::sleep(delay).await;
        responder
            .send(200, json!({ "slept": delay.as_millis() as u64 }))
            .await?;
        Ok::<(), BoxError>(())
    })?;

    routes.post(API_VERSION, "/broadcast", move |request, responder| {
        let registry = Arc::clone(&registry);
        async move {
            let notice = Response::new(
                "broadcast",
                responder.url(),
                200,
                json!({ "from": responder.session_id().to_string(), "body": request.body }),
                "",
            );
            let delivered = registry.broadcast(&notice).await;
            info!(delivered, "Broadcast sent");
            responder.send(200, json!({ "delivered": delivered })).await?;
            Ok::<(), BoxError>(())
        }
    })?;

    Ok(routes)
}
