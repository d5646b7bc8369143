//! End-to-end: a real listener, an in-process broker, and reqwest SSE clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use relay_broker::MemoryBroker;
use relay_server::config::ServerConfig;
use relay_server::server::RelayServer;

const WAIT: Duration = Duration::from_secs(5);

/// One parsed SSE frame.
#[derive(Debug)]
struct Frame {
    event: Option<String>,
    data: String,
}

impl Frame {
    fn name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.data).unwrap()
    }
}

/// Minimal SSE reader over a reqwest byte stream.
struct SseReader {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: String,
}

impl SseReader {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            body: resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
            buffer: String::new(),
        }
    }

    /// Next frame, or `None` once the server ends the stream.
    async fn next(&mut self) -> Option<Frame> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let raw: String = self.buffer.drain(..end + 2).collect();
                return Some(parse_frame(&raw));
            }
            let chunk = tokio::time::timeout(WAIT, self.body.next())
                .await
                .expect("timed out waiting for SSE data")?
                .unwrap();
            self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }
}

fn parse_frame(raw: &str) -> Frame {
    let mut event = None;
    let mut data = Vec::new();
    for line in raw.lines() {
        if let Some(name) = line.strip_prefix("event: ") {
            event = Some(name.to_string());
        } else if let Some(value) = line.strip_prefix("data: ") {
            data.push(value);
        } else if line == "data:" {
            data.push("");
        }
    }
    Frame {
        event,
        data: data.join("\n"),
    }
}

async fn start() -> (RelayServer, MemoryBroker, SocketAddr) {
    let broker = MemoryBroker::new();
    let server = RelayServer::new(ServerConfig::default(), Arc::new(broker.clone()));
    let (addr, _handle) = server.listen().await.unwrap();
    (server, broker, addr)
}

async fn open(addr: SocketAddr, session: &str) -> SseReader {
    let resp = reqwest::get(format!("http://{addr}/api/v1.0/a1/stream/{session}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    SseReader::new(resp)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn relays_published_messages_in_order() {
    let (server, broker, addr) = start().await;
    let mut client = open(addr, "abc").await;

    let connected = client.next().await.unwrap();
    assert_eq!(connected.name(), "connected");
    assert_eq!(connected.json()["session_id"], "abc");
    assert_eq!(connected.json()["channel"], "chat_stream:abc");

    let _ = broker.publish("chat_stream:abc", r#"{"type":"token","text":"Hel"}"#);
    let _ = broker.publish("chat_stream:abc", r#"{"type":"token","text":"lo"}"#);
    let _ = broker.publish("chat_stream:abc", "raw text");
    let _ = broker.publish("chat_stream:abc", "line one\nline two");
    let _ = broker.publish("chat_stream:abc", r#"{"type":"done"}"#);
    let _ = broker.publish("chat_stream:abc", "__STOP__");

    let mut frames = Vec::new();
    while let Some(frame) = client.next().await {
        frames.push(frame);
    }

    let names: Vec<_> = frames.iter().map(Frame::name).collect();
    assert_eq!(names, ["token", "token", "message", "message", "done"]);
    assert_eq!(frames[0].data, r#"{"type":"token","text":"Hel"}"#);
    assert!(frames[2].event.is_none());
    assert_eq!(frames[2].data, "raw text");
    assert_eq!(frames[3].data, "line one\nline two");

    wait_until(|| broker.subscriber_count("chat_stream:abc") == 0).await;
    let stats = broker.stats();
    assert_eq!(stats.unsubscribes, 1);
    assert_eq!(stats.closes, 1);

    server.shutdown().graceful_shutdown(Some(WAIT)).await;
}

#[tokio::test]
async fn independent_clients_on_one_session() {
    let (server, broker, addr) = start().await;
    let mut a = open(addr, "shared").await;
    let mut b = open(addr, "shared").await;
    let _ = a.next().await.unwrap();
    let _ = b.next().await.unwrap();
    assert_eq!(broker.subscriber_count("chat_stream:shared"), 2);

    let _ = broker.publish("chat_stream:shared", r#"{"type":"delta","n":1}"#);
    assert_eq!(a.next().await.unwrap().name(), "delta");
    assert_eq!(b.next().await.unwrap().name(), "delta");

    // One client leaving does not disturb the other.
    drop(a);
    wait_until(|| broker.subscriber_count("chat_stream:shared") == 1).await;
    let _ = broker.publish("chat_stream:shared", r#"{"type":"delta","n":2}"#);
    assert_eq!(b.next().await.unwrap().json()["n"], 2);

    server.shutdown().graceful_shutdown(Some(WAIT)).await;
    assert!(b.next().await.is_none());
    assert_eq!(broker.subscriber_count("chat_stream:shared"), 0);
}

#[tokio::test]
async fn broker_fault_ends_stream_with_one_error() {
    let (server, broker, addr) = start().await;
    let mut client = open(addr, "flaky").await;
    let _ = client.next().await.unwrap();

    let _ = broker.inject_fault("chat_stream:flaky", "connection reset by peer");

    let error = client.next().await.unwrap();
    assert_eq!(error.name(), "error");
    assert!(
        error.json()["error"]
            .as_str()
            .unwrap()
            .contains("connection reset by peer")
    );
    assert!(client.next().await.is_none());
    wait_until(|| broker.subscriber_count("chat_stream:flaky") == 0).await;

    server.shutdown().graceful_shutdown(Some(WAIT)).await;
}

#[tokio::test]
async fn shutdown_ends_streams_silently() {
    let (server, broker, addr) = start().await;
    let mut client = open(addr, "s1").await;
    let _ = client.next().await.unwrap();
    assert_eq!(server.registry().count().await, 1);

    server.shutdown().graceful_shutdown(Some(WAIT)).await;

    assert!(client.next().await.is_none());
    assert_eq!(broker.subscriber_count("chat_stream:s1"), 0);
    assert_eq!(server.registry().count().await, 0);
}

#[tokio::test]
async fn health_and_unavailable_broker() {
    let (server, broker, addr) = start().await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["broker"], "reachable");

    broker.set_reachable(false);
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 500);

    let resp = reqwest::get(format!("http://{addr}/api/v1.0/a1/stream/s1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());

    server.shutdown().graceful_shutdown(Some(WAIT)).await;
}
