//! Shared utilities for integration tests: mock etcd members built on raw TCP
//! and a proxy running on a loopback port.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use watch_proxy::http::ServerError;
use watch_proxy::{HttpServer, ProxyConfig, Shutdown, WatchHub};

/// What a mock member saw on the wire.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

type Requests = Arc<Mutex<Vec<RecordedRequest>>>;

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        method,
        target,
        headers,
        body,
    })
}

/// A member that answers every request with an endless chunked stream of the
/// lines pushed through `send_line`.
pub struct StreamingBackend {
    pub addr: SocketAddr,
    lines: broadcast::Sender<Option<String>>,
    requests: Requests,
    closed: Arc<AtomicUsize>,
}

impl StreamingBackend {
    /// Push one line (a newline is appended) to every open stream.
    pub fn send_line(&self, line: &str) {
        let _ = self.lines.send(Some(format!("{}\n", line)));
    }

    /// End every open stream cleanly.
    pub fn finish(&self) {
        let _ = self.lines.send(None);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Streams that have been closed, by either side.
    pub fn closed_streams(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub async fn start_streaming_backend() -> StreamingBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (lines, _) = broadcast::channel(64);
    let requests: Requests = Arc::default();
    let closed = Arc::new(AtomicUsize::new(0));

    let backend = StreamingBackend {
        addr,
        lines: lines.clone(),
        requests: requests.clone(),
        closed: closed.clone(),
    };

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_stream(
                socket,
                lines.subscribe(),
                requests.clone(),
                closed.clone(),
            ));
        }
    });

    backend
}

async fn serve_stream(
    mut socket: TcpStream,
    mut lines: broadcast::Receiver<Option<String>>,
    requests: Requests,
    closed: Arc<AtomicUsize>,
) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    requests.lock().unwrap().push(request);

    let head = "HTTP/1.1 200 OK\r\n\
                Content-Type: application/json\r\n\
                X-Etcd-Index: 7\r\n\
                Connection: close\r\n\
                Transfer-Encoding: chunked\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_ok() {
        let mut probe = [0u8; 64];
        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Ok(Some(line)) => {
                        let chunk = format!("{:x}\r\n{}\r\n", line.len(), line);
                        if socket.write_all(chunk.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(broadcast::error::RecvError::Closed) => {
                        let _ = socket.write_all(b"0\r\n\r\n").await;
                        let _ = socket.shutdown().await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                },
                read = socket.read(&mut probe) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                },
            }
        }
    }
    closed.fetch_add(1, Ordering::SeqCst);
}

/// A member that answers every request with the same short response.
pub struct FixedBackend {
    pub addr: SocketAddr,
    requests: Requests,
}

impl FixedBackend {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Responses carry `X-Backend: {name}` plus hop-by-hop fields the proxy must strip.
pub async fn start_fixed_backend(name: &'static str, status: u16, body: &'static str) -> FixedBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Requests = Arc::default();
    let recorded = requests.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                recorded.lock().unwrap().push(request);

                let response = format!(
                    "HTTP/1.1 {} Mock\r\n\
                     Content-Type: text/plain\r\n\
                     Content-Length: {}\r\n\
                     Connection: close, X-Private\r\n\
                     X-Private: secret\r\n\
                     Keep-Alive: timeout=5\r\n\
                     X-Backend: {}\r\n\r\n{}",
                    status,
                    body.len(),
                    name,
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    FixedBackend { addr, requests }
}

/// Open a watch over a bare socket and return it once the response head has
/// arrived. Dropping the socket is an abrupt client disconnect.
pub async fn raw_watch(proxy: SocketAddr, path: &str) -> TcpStream {
    let mut socket = TcpStream::connect(proxy).await.unwrap();
    let request = format!("GET {} HTTP/1.1\r\nHost: {}\r\n\r\n", path, proxy);
    socket.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut byte))
            .await
            .expect("timed out waiting for the response head")
            .unwrap();
        assert_eq!(n, 1, "connection closed before the response head");
        head.push(byte[0]);
    }
    assert!(head.starts_with(b"HTTP/1.1 200"), "unexpected head: {}", String::from_utf8_lossy(&head));
    socket
}

/// An address nothing listens on.
pub fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub fn proxy_config(endpoints: &[SocketAddr]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.upstream.endpoints = endpoints.iter().map(ToString::to_string).collect();
    config
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub hub: WatchHub,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config).unwrap();
    let hub = server.hub().clone();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestProxy {
        addr,
        hub,
        shutdown,
        task,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Reads a streaming response line by line.
pub struct LineReader {
    response: reqwest::Response,
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buf: Vec::new(),
        }
    }

    /// Next line without its newline, or `None` once the body has ended.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                return Some(String::from_utf8_lossy(&line[..line.len() - 1]).to_string());
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.response.chunk())
                .await
                .expect("timed out waiting for the response body")
                .ok()??;
            self.buf.extend_from_slice(&chunk);
        }
    }
}

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {}", what);
}
