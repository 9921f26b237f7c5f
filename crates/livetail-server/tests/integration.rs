//! End-to-end tests over a real listener: REST queries steer what a
//! websocket connection under the same client id receives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use livetail_events::{Event, MemoryStore};
use livetail_server::{HubError, HubEvent, LivetailServer, ServerConfig};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    server: LivetailServer,
    addr: SocketAddr,
    errors: mpsc::Receiver<HubError>,
}

async fn boot() -> Running {
    let (tx, errors) = mpsc::channel(64);
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    };
    let server = LivetailServer::new(config, Arc::new(MemoryStore::new()), tx, None);
    let (addr, _task) = server.listen().await.unwrap();
    Running {
        server,
        addr,
        errors,
    }
}

async fn connect(addr: SocketAddr, client_id: &str) -> Ws {
    let mut req = format!("ws://{addr}/api/ws").into_client_request().unwrap();
    let _ = req
        .headers_mut()
        .insert("x-user-id", HeaderValue::from_str(client_id).unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();
    ws
}

async fn wait_for<F>(monitor: &mut broadcast::Receiver<HubEvent>, mut pred: F) -> HubEvent
where
    F: FnMut(&HubEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = monitor.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

async fn next_event(ws: &mut Ws) -> Event {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn post(addr: SocketAddr, event: &Event) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://{addr}/api/"))
        .json(event)
        .send()
        .await
        .unwrap()
        .status()
}

fn event(key: &str, entity: &str) -> Event {
    Event::new(key, "integration", 1, "tests").with_entities([entity])
}

#[tokio::test]
async fn rest_query_steers_websocket_stream() {
    let rt = boot().await;
    let mut monitor = rt.server.hub().subscribe();

    let mut ws = connect(rt.addr, "abc").await;
    let _ = wait_for(&mut monitor, |e| {
        matches!(e, HubEvent::Registered { client_id, .. } if client_id.as_str() == "abc")
    })
    .await;

    let resp = reqwest::Client::new()
        .get(format!("http://{}/api/search?entities=user/foo", rt.addr))
        .header("x-user-id", "abc")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "[]");
    let _ = wait_for(&mut monitor, |e| matches!(e, HubEvent::FilterPaired { .. })).await;

    assert_eq!(post(rt.addr, &event("first", "user/foo")).await, 201);
    assert_eq!(post(rt.addr, &event("skipped", "user/bar")).await, 201);
    assert_eq!(post(rt.addr, &event("third", "user/foo")).await, 201);

    let first = next_event(&mut ws).await;
    assert_eq!(first.key, "first");
    assert!(first.is_saved());
    assert_eq!(next_event(&mut ws).await.key, "third");

    let health: serde_json::Value = reqwest::get(format!("http://{}/health", rt.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);

    ws.close(None).await.unwrap();
    let _ = wait_for(&mut monitor, |e| matches!(e, HubEvent::Removed { .. })).await;
    assert!(rt.server.hub().clients().await.unwrap().is_empty());

    rt.server.stop(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn filter_frame_over_websocket() {
    let mut rt = boot().await;
    let mut monitor = rt.server.hub().subscribe();

    let mut ws = connect(rt.addr, "frames").await;
    let _ = wait_for(&mut monitor, |e| matches!(e, HubEvent::Registered { .. })).await;

    ws.send(Message::text(r#"{"tags":["deploy"]}"#)).await.unwrap();
    ws.send(Message::text("not json")).await.unwrap();
    // Frames are applied in order: once the bad one is reported the tag
    // filter is installed, and it survives the bad frame.
    let reported = tokio::time::timeout(Duration::from_secs(5), rt.errors.recv())
        .await
        .unwrap();
    assert!(matches!(reported, Some(HubError::Decode { .. })));

    let untagged = event("untagged", "svc/api");
    let tagged = Event::new("tagged", "d", 1, "tests").with_tags(["deploy"]);
    assert_eq!(post(rt.addr, &untagged).await, 201);
    assert_eq!(post(rt.addr, &tagged).await, 201);

    assert_eq!(next_event(&mut ws).await.key, "tagged");
    rt.server.stop(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn newer_connection_supersedes_older() {
    let rt = boot().await;
    let mut monitor = rt.server.hub().subscribe();

    let mut old = connect(rt.addr, "dup").await;
    let _ = wait_for(&mut monitor, |e| matches!(e, HubEvent::Registered { .. })).await;
    let mut new = connect(rt.addr, "dup").await;
    let _ = wait_for(&mut monitor, |e| matches!(e, HubEvent::Superseded { .. })).await;

    assert_eq!(post(rt.addr, &event("only-new", "user/foo")).await, 201);
    assert_eq!(next_event(&mut new).await.key, "only-new");

    let silent = tokio::time::timeout(Duration::from_millis(200), old.next()).await;
    assert!(silent.is_err(), "superseded connection still received events");

    rt.server.stop(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn minted_identity_cookie_is_reused() {
    let rt = boot().await;
    let client = reqwest::Client::builder().cookie_store(true).build().unwrap();
    let url = format!("http://{}/api/search", rt.addr);

    let first = client.get(&url).send().await.unwrap();
    assert!(first.headers().contains_key(reqwest::header::SET_COOKIE));
    let second = client.get(&url).send().await.unwrap();
    assert!(!second.headers().contains_key(reqwest::header::SET_COOKIE));

    rt.server.stop(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn rest_error_statuses() {
    let rt = boot().await;
    let client = reqwest::Client::new();
    let base = format!("http://{}/api", rt.addr);

    let mut saved = event("saved", "user/foo");
    saved.id = 7;
    assert_eq!(post(rt.addr, &saved).await, 400);

    let resp = client.get(format!("{base}/404/")).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client.get(format!("{base}/aggregate/color")).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .put(format!("{base}/3/"))
        .json(&event("unsaved", "user/foo"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.text().await.unwrap(), "Update non-existing resource");

    rt.server.stop(Some(Duration::from_secs(2))).await;
}
