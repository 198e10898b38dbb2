//! End-to-end tests over real TCP connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use memoserve::cache::{CacheMiddleware, CacheStore};
use memoserve::config::ServerSettings;
use memoserve::http::ResponseWriter;
use memoserve::middleware::{Handler, LoggerMiddleware, handler_fn};
use memoserve::{Server, ServerError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

const WELCOME: &str = "Welcome to memoserve!\n";

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    async fn shutdown(self) -> Result<(), ServerError> {
        let _ = self.stop.send(());
        self.task.await.unwrap()
    }
}

fn local_settings() -> ServerSettings {
    ServerSettings {
        host: "127.0.0.1".to_owned(),
        port: 0,
        shutdown_grace_secs: 1,
        ..ServerSettings::default()
    }
}

async fn spawn(server: Server) -> Running {
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(bound.serve_with_shutdown(async {
        let _ = stopped.await;
    }));
    Running { addr, stop, task }
}

fn counting_welcome(calls: Arc<AtomicUsize>) -> Handler {
    handler_fn(move |_ctx, w| {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { w.write_all(WELCOME.as_bytes()) })
    })
}

fn echo_path() -> Handler {
    handler_fn(|ctx, w| {
        let path = ctx.path().to_owned();
        Box::pin(async move { w.write_all(path.as_bytes()) })
    })
}

/// Reads one response: status line, headers, and a `Content-Length` body.
async fn read_response<R>(reader: &mut BufReader<R>) -> (u16, Vec<(String, String)>, String)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let status: u16 = line.split_whitespace().nth(1).unwrap().parse().unwrap();

    let mut headers = Vec::new();
    let mut length = 0;
    loop {
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        let (name, value) = trimmed.split_once(": ").unwrap();
        if name.eq_ignore_ascii_case("content-length") {
            length = value.parse().unwrap();
        }
        headers.push((name.to_owned(), value.to_owned()));
    }

    let mut body = vec![0; length];
    reader.read_exact(&mut body).await.unwrap();
    (status, headers, String::from_utf8(body).unwrap())
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut reader = BufReader::new(stream);
    let (status, _, body) = read_response(&mut reader).await;
    (status, body)
}

#[tokio::test]
async fn second_request_is_served_from_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = CacheStore::new();

    let mut server = Server::new(local_settings());
    server.add_middleware(LoggerMiddleware);
    server.add_middleware(CacheMiddleware::new(store.clone()));
    server.add_route("/", counting_welcome(Arc::clone(&calls)));
    let running = spawn(server).await;

    assert_eq!(get(running.addr, "/").await, (200, WELCOME.to_owned()));
    assert_eq!(get(running.addr, "/").await, (200, WELCOME.to_owned()));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.load("/").as_deref(), Some(WELCOME.as_bytes()));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn routes_added_before_cache_are_not_cached() {
    let calls = Arc::new(AtomicUsize::new(0));

    let mut server = Server::new(local_settings());
    server.add_route("/", counting_welcome(Arc::clone(&calls)));
    server.add_middleware(CacheMiddleware::new(CacheStore::new()));
    let running = spawn(server).await;

    get(running.addr, "/").await;
    get(running.addr, "/").await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn pipelined_requests_are_answered_in_order() {
    let mut server = Server::new(local_settings());
    server.add_route("/a", echo_path());
    server.add_route("/b", echo_path());
    let running = spawn(server).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream
        .write_all(
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n\
              POST /b HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\nabc\
              GET /a HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();

    let mut reader = BufReader::new(stream);
    let (_, first_headers, first) = read_response(&mut reader).await;
    let (_, _, second) = read_response(&mut reader).await;
    let (_, last_headers, third) = read_response(&mut reader).await;

    assert_eq!([first.as_str(), second.as_str(), third.as_str()], ["/a", "/b", "/a"]);
    assert_eq!(header(&first_headers, "connection"), Some("keep-alive"));
    assert_eq!(header(&last_headers, "connection"), Some("close"));

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_path_is_404() {
    let running = spawn(Server::new(local_settings())).await;
    assert_eq!(get(running.addr, "/missing").await, (404, "404 page not found\n".to_owned()));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_request_is_400_and_closed() {
    let running = spawn(Server::new(local_settings())).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream.write_all(b"\x01\x02 nonsense\r\n\r\n").await.unwrap();
    let mut reader = BufReader::new(stream);
    let (status, headers, _) = read_response(&mut reader).await;

    assert_eq!(status, 400);
    assert_eq!(header(&headers, "connection"), Some("close"));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn oversized_request_is_413() {
    let settings = ServerSettings {
        max_request_bytes: 64,
        ..local_settings()
    };
    let mut server = Server::new(settings);
    server.add_route("/upload", echo_path());
    let running = spawn(server).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream
        .write_all(b"POST /upload HTTP/1.1\r\nHost: x\r\nContent-Length: 4096\r\n\r\n")
        .await
        .unwrap();
    let mut reader = BufReader::new(stream);
    let (status, _, _) = read_response(&mut reader).await;

    assert_eq!(status, 413);
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn overflowing_content_length_is_413() {
    let mut server = Server::new(local_settings());
    server.add_route("/upload", echo_path());
    let running = spawn(server).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    let request = format!(
        "POST /upload HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
        usize::MAX
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut reader = BufReader::new(stream);
    let (status, headers, _) = read_response(&mut reader).await;

    assert_eq!(status, 413);
    assert_eq!(header(&headers, "connection"), Some("close"));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn head_request_gets_headers_without_body() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut server = Server::new(local_settings());
    server.add_route("/", counting_welcome(Arc::clone(&calls)));
    let running = spawn(server).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream
        .write_all(b"HEAD / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8(raw).unwrap();

    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(raw.contains(&format!("Content-Length: {}\r\n", WELCOME.len())));
    assert!(raw.ends_with("\r\n\r\n"));
    assert!(!raw.contains("Welcome"));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_idle_connections() {
    let mut server = Server::new(local_settings());
    server.add_route("/a", echo_path());
    let running = spawn(server).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream.write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let mut reader = BufReader::new(stream);
    let (status, _, _) = read_response(&mut reader).await;
    assert_eq!(status, 200);

    running.shutdown().await.unwrap();

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn stuck_handler_exceeds_grace_period() {
    let started = Arc::new(Notify::new());
    let signal = Arc::clone(&started);

    let mut server = Server::new(local_settings());
    server.add_route(
        "/slow",
        handler_fn(move |_ctx, w| {
            let signal = Arc::clone(&signal);
            Box::pin(async move {
                signal.notify_one();
                tokio::time::sleep(Duration::from_secs(30)).await;
                w.write_all(b"late")
            })
        }),
    );
    let running = spawn(server).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream.write_all(b"GET /slow HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    started.notified().await;

    let err = running.shutdown().await.unwrap_err();
    assert!(matches!(
        err,
        ServerError::ShutdownTimeout { remaining: 1, .. }
    ));
}
