//! Reads requests from stdin, one per line, and prints every response.
//!
//! A line is either a full JSON request object or `METHOD URL [JSON body]`,
//! e.g. `GET /v1/users/42` or `POST /v1/echo {"hello":"world"}`.

use anyhow::{Context, Result, anyhow};
use linewire::Request;
use linewire::client::LineClient;
use linewire_prototype::{addr_from_env, init_tracing};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let addr = addr_from_env()?;
    let client = LineClient::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    info!(%addr, "Connected");

    let (mut sender, mut responses) = client.split();

    let printer = tokio::spawn(async move {
        while let Some(response) = responses.next_message().await {
            match response {
                Ok(response) => match serde_json::to_string(&response) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "Failed to print response"),
                },
                Err(e) if e.is_fatal() => {
                    warn!(error = %e, "Connection failed");
                    break;
                }
                Err(e) => warn!(error = %e, "Malformed response"),
            }
        }
        info!("Server closed the connection");
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(request) => {
                sender.send(&request).await?;
            }
            Err(e) => warn!(error = %e, "Skipping input line"),
        }
    }

    // Let outstanding requests finish before the server closes its side.
    sender.close().await?;
    printer.await?;
    Ok(())
}

fn parse_line(line: &str) -> Result<Request> {
    let mut request = if line.starts_with('{') {
        serde_json::from_str::<Request>(line).context("invalid request object")?
    } else {
        let mut parts = line.splitn(3, char::is_whitespace);
        let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
        let url = parts.next().ok_or_else(|| anyhow!("missing url"))?;
        let mut request = Request::new(method, url);
        if let Some(body) = parts.next() {
            request.body = serde_json::from_str(body.trim()).context("body must be a JSON object")?;
        }
        request
    };

    if request.request_id.is_empty() {
        request.request_id = uuid::Uuid::new_v4().to_string();
    }
    Ok(request)
}
