use linewire::client::LineClient;
use linewire::server::{ListenAddr, RouteTable, Server, ServerConfig, Service, SessionRegistry};
use linewire::{BoxError, Request, Response};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn routes(registry: Arc<SessionRegistry>) -> RouteTable {
    let mut routes = RouteTable::new();
    routes
        .get("v1", "/users/:id", |request, responder| async move {
            let id = request.param("id").unwrap_or_default().to_owned();
            responder.send(200, json!({ "id": id })).await?;
            Ok::<(), BoxError>(())
        })
        .unwrap();
    routes
        .post("v1", "/echo", |request, responder| async move {
            responder.send(200, request.body).await?;
            Ok::<(), BoxError>(())
        })
        .unwrap();
    routes
        .post("v1", "/broadcast", move |request, responder| {
            let registry = Arc::clone(&registry);
            async move {
                let notice = Response::new("broadcast", responder.url(), 200, json!(request.body), "");
                let delivered = registry.broadcast(&notice).await;
                responder.send(200, json!({ "delivered": delivered })).await?;
                Ok::<(), BoxError>(())
            }
        })
        .unwrap();
    routes
}

async fn start(listen: ListenAddr) -> (ListenAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let registry = Arc::new(SessionRegistry::new());
    let service = Service::new(routes(Arc::clone(&registry)), registry);
    let config = ServerConfig::builder().listen(listen).build();
    let server = Server::bind(&config, service).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        server
            .run_until(async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    (addr, stop, task)
}

async fn recv(client: &mut LineClient) -> Response {
    timeout(WAIT, client.next_response())
        .await
        .expect("timed out")
        .expect("connection closed")
        .expect("malformed response")
}

async fn exercise(addr: ListenAddr) {
    let mut client = LineClient::connect(&addr).await.unwrap();

    client
        .send(&Request::new("GET", "/v1/users/Alice").with_request_id("1"))
        .await
        .unwrap();
    let response = recv(&mut client).await;
    assert_eq!(response.kind, "request");
    assert_eq!(response.url, "/v1/users/:id");
    assert_eq!(response.request_id, "1");
    assert_eq!(response.data, json!({"id": "Alice"}));

    let mut body = serde_json::Map::new();
    body.insert("hello".into(), json!("world"));
    client
        .send(&Request::new("post", "/V1/ECHO").with_body(body).with_request_id("2"))
        .await
        .unwrap();
    let response = recv(&mut client).await;
    assert_eq!(response.url, "/v1/echo");
    assert_eq!(response.data, json!({"hello": "world"}));

    client
        .send(&Request::new("GET", "/v1/missing").with_request_id("3"))
        .await
        .unwrap();
    let response = recv(&mut client).await;
    assert_eq!(response.code, 404);
    assert_eq!(response.url, "/v1/missing");

    client.close().await.unwrap();
    assert!(timeout(WAIT, client.next_response()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_tcp_roundtrip() {
    let (addr, stop, task) = start("127.0.0.1:0".parse().unwrap()).await;
    exercise(addr).await;

    stop.send(()).unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_broadcast_reaches_other_clients() {
    let (addr, stop, task) = start("127.0.0.1:0".parse().unwrap()).await;
    let mut sender = LineClient::connect(&addr).await.unwrap();
    let mut listener = LineClient::connect(&addr).await.unwrap();

    // Make sure the listener's session is serving before broadcasting.
    listener
        .send(&Request::new("GET", "/v1/users/ready").with_request_id("ready"))
        .await
        .unwrap();
    assert_eq!(recv(&mut listener).await.request_id, "ready");

    let mut body = serde_json::Map::new();
    body.insert("text".into(), json!("hi all"));
    sender
        .send(&Request::new("POST", "/v1/broadcast").with_body(body).with_request_id("b"))
        .await
        .unwrap();

    let notice = recv(&mut listener).await;
    assert_eq!(notice.kind, "broadcast");
    assert_eq!(notice.data, json!({"text": "hi all"}));

    // The sender gets the broadcast as well as its own reply; order between
    // the two is not fixed.
    let mut replies = vec![recv(&mut sender).await, recv(&mut sender).await];
    replies.sort_by(|a, b| a.kind.cmp(&b.kind));
    assert_eq!(replies[0].kind, "broadcast");
    assert_eq!(replies[1].request_id, "b");
    assert_eq!(replies[1].data, json!({"delivered": 2}));

    stop.send(()).unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_open_connections() {
    let (addr, stop, task) = start("127.0.0.1:0".parse().unwrap()).await;
    let mut client = LineClient::connect(&addr).await.unwrap();

    client
        .send(&Request::new("GET", "/v1/users/1").with_request_id("x"))
        .await
        .unwrap();
    assert_eq!(recv(&mut client).await.request_id, "x");

    stop.send(()).unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();
    assert!(timeout(WAIT, client.next_response()).await.unwrap().is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_roundtrip() {
    let path = std::env::temp_dir().join(format!("linewire-it-{}.sock", std::process::id()));
    let (addr, stop, task) = start(ListenAddr::Unix(path.clone())).await;
    exercise(addr).await;

    stop.send(()).unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();
    assert!(!path.exists());
}
