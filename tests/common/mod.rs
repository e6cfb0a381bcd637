//! Shared mock upstreams for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Path,
    http::{Request, StatusCode},
    routing::any,
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener};

/// A canned HTTP/1.1 response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn to_wire(&self) -> String {
        let reason = StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let mut out = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            reason,
            self.body.len()
        );
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

/// Read a bodyless request head off the socket.
async fn read_head(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    return;
                }
            }
        }
    }
}

/// Raw TCP backend answering request `n` (1-based) with `f(n)`. Returns its address and hit counter.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Arc<AtomicU32>)
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        read_head(&mut socket).await;
                        let hit = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        let response = f(hit).await;
                        let _ = socket.write_all(response.to_wire().as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    (addr, hits)
}

/// Backend that answers every request with the same 200 body.
pub async fn start_mock_backend(body: &'static str) -> (SocketAddr, Arc<AtomicU32>) {
    start_programmable_backend(move |_| async move { MockResponse::new(200, body) }).await
}

/// Backend that resets the connection on odd-numbered requests and answers the rest.
pub async fn start_reset_on_odd_backend(body: &'static str) -> (SocketAddr, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        read_head(&mut socket).await;
                        let hit = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        if hit % 2 == 1 {
                            #[allow(deprecated)]
                            let _ = socket.set_linger(Some(Duration::ZERO));
                            drop(socket);
                            return;
                        }
                        let response = MockResponse::new(200, body);
                        let _ = socket.write_all(response.to_wire().as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    (addr, hits)
}

/// Echoes the request back as JSON: method, path, query, version, headers, body.
async fn echo(request: Request<Body>) -> Json<Value> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    let headers: Map<String, Value> = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                Value::String(value.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();
    Json(json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "version": format!("{:?}", parts.version),
        "headers": headers,
        "body": String::from_utf8_lossy(&bytes),
    }))
}

async fn slow(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "slow"
}

/// `/slow/{ms}` sleeps then answers; everything else echoes.
pub fn echo_router() -> Router {
    Router::new()
        .route("/slow/{ms}", any(slow))
        .fallback(echo)
}

/// Axum echo upstream over TCP. Accepts HTTP/1.1 and prior-knowledge HTTP/2.
pub async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, echo_router()).await;
    });
    addr
}

/// Axum echo upstream on a fresh unix socket. Returns the socket path.
pub async fn start_unix_echo_upstream() -> PathBuf {
    let path = std::env::temp_dir().join(format!("http-forwarder-{}.sock", uuid::Uuid::new_v4()));
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, echo_router()).await;
    });
    path
}

/// Base origin for a unix socket path.
pub fn unix_base(path: &std::path::Path) -> String {
    let encoded = percent_encoding::utf8_percent_encode(
        path.to_str().unwrap(),
        percent_encoding::NON_ALPHANUMERIC,
    );
    format!("unix+http://{encoded}/")
}

/// Collect a response body as JSON.
pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collect a response body as text.
pub async fn text_body(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Bodyless inbound request.
pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Listener that accepts connections, counts them and never answers.
pub async fn start_silent_listener() -> (SocketAddr, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicU32::new(0));
    let counter = accepts.clone();

    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            open.push(socket);
        }
    });
    (addr, accepts)
}

/// Prior-knowledge HTTP/2 upstream that answers the first stream of every connection with
/// its path, then sends GOAWAY and closes. Returns accepted and closed connection counters.
pub async fn start_goaway_h2_upstream() -> (SocketAddr, Arc<AtomicU32>, Arc<AtomicU32>) {
    use futures_util::future::{select, Either};
    use hyper::server::conn::http2;
    use hyper_util::rt::{TokioExecutor, TokioIo};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicU32::new(0));
    let closed = Arc::new(AtomicU32::new(0));
    let (accepted_count, closed_count) = (accepted.clone(), closed.clone());

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            accepted_count.fetch_add(1, Ordering::SeqCst);
            let closed_count = closed_count.clone();
            tokio::spawn(async move {
                let served = Arc::new(tokio::sync::Notify::new());
                let signal = served.clone();
                let service = hyper::service::service_fn(move |req: Request<hyper::body::Incoming>| {
                    let signal = signal.clone();
                    async move {
                        signal.notify_one();
                        Ok::<_, std::convert::Infallible>(axum::http::Response::new(Body::from(
                            req.uri().path().to_string(),
                        )))
                    }
                });
                let conn = http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(socket), service);
                tokio::pin!(conn);
                let notified = served.notified();
                tokio::pin!(notified);
                if let Either::Right((_, mut conn)) = select(conn.as_mut(), notified).await {
                    conn.as_mut().graceful_shutdown();
                    let _ = conn.await;
                }
                closed_count.fetch_add(1, Ordering::SeqCst);
            });
        }
    });
    (addr, accepted, closed)
}

/// Poll `counter` until it reaches `target`, for at most two seconds.
pub async fn wait_for(counter: &AtomicU32, target: u32) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) >= target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("counter stayed at {}", counter.load(Ordering::SeqCst));
}
