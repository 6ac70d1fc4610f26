use anyhow::Result;
use linewire::server::{Server, Service, SessionRegistry};
use linewire_prototype::{config_from_env, demo_routes, init_tracing};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = config_from_env()?;
    let registry = Arc::new(SessionRegistry::new());
    let service = Service::new(demo_routes(Arc::clone(&registry))?, registry);

    let server = Server::bind(&config, service).await?;
    info!(addr = %server.local_addr()?, "Server started, Ctrl-C to stop");

    let result = server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Server stopped");
    result?;
    Ok(())
}
