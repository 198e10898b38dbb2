//! Async HTTP/1.1 server on Tokio.
//!
//! [`Server`] is the setup phase: middleware and routes are registered through
//! `&mut self`. [`Server::bind`] consumes it into a [`BoundServer`], which shares the
//! finished route table read-only across one task per connection. Registration can
//! therefore never race live traffic.
//!
//! Connections are HTTP/1.1 persistent by default. On shutdown the listener stops
//! accepting, idle connections are closed, and in-flight requests get the configured
//! grace period to finish.

pub mod tls;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ServerSettings;
use crate::http::{
    Method, ResponseWriter, StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::middleware::{Chain, Handler, HandlerResult, Middleware};
use crate::router::Router;

pub use tls::TlsError;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("{remaining} connection(s) still open after the {grace:?} shutdown grace period")]
    ShutdownTimeout { grace: Duration, remaining: usize },
}

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

const TOO_LARGE_BODY: &str = "Request entity too large";

/// Route table plus middleware, before any socket exists.
///
/// Each route is wrapped in the middleware registered *before* it, first registered
/// outermost. Middleware added after a route does not apply to that route.
///
/// # Examples
///
/// ```rust,no_run
/// use memoserve::Server;
/// use memoserve::cache::{CacheMiddleware, CacheStore};
/// use memoserve::config::ServerSettings;
/// use memoserve::http::ResponseWriter;
/// use memoserve::middleware::{LoggerMiddleware, handler_fn};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut server = Server::new(ServerSettings::default());
///     server.add_middleware(LoggerMiddleware);
///     server.add_middleware(CacheMiddleware::new(CacheStore::new()));
///     server.add_route("/", handler_fn(|_ctx, w| {
///         Box::pin(async move { w.write_all(b"Welcome!\n") })
///     }));
///     server.start().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    settings: ServerSettings,
    chain: Chain,
    router: Router,
}

impl Server {
    pub fn new(settings: ServerSettings) -> Self {
        Self {
            settings,
            chain: Chain::new(),
            router: Router::new(),
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Appends a middleware; it wraps routes registered from now on, inside the
    /// middleware already registered.
    pub fn add_middleware<M>(&mut self, middleware: M)
    where
        M: Middleware + 'static,
    {
        self.chain.push(middleware);
    }

    /// Registers `handler` for every method on `pattern`, wrapped in the current
    /// middleware.
    pub fn add_route(&mut self, pattern: &str, handler: Handler) {
        let composed = self.chain.wrap(handler);
        self.router.any(pattern, composed);
    }

    /// Like [`add_route`](Self::add_route) but only for `method`.
    pub fn add_method_route(&mut self, method: Method, pattern: &str, handler: Handler) {
        let composed = self.chain.wrap(handler);
        self.router.on(method, pattern, composed);
    }

    pub fn route_count(&self) -> usize {
        self.router.len()
    }

    /// Runs `request` through the route table into `writer`, no socket involved.
    ///
    /// # Errors
    ///
    /// Whatever the matched handler chain returned.
    pub async fn handle(
        &self,
        request: Request,
        writer: &mut dyn ResponseWriter,
    ) -> HandlerResult {
        self.router.dispatch(request, writer).await
    }

    /// Binds the configured `host:port`, ending the setup phase.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let addr = self.settings.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(BoundServer {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                router: self.router,
                settings: self.settings,
            }),
            tls: None,
        })
    }

    /// Binds and serves plain HTTP until Ctrl-C (or SIGTERM on Unix).
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind) and [`BoundServer::serve_with_shutdown`].
    pub async fn start(self) -> Result<(), ServerError> {
        self.bind()
            .await?
            .serve_with_shutdown(shutdown_signal())
            .await
    }

    /// Binds and serves HTTPS with the given PEM files until Ctrl-C (or SIGTERM on Unix).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Tls`] if the certificate or key cannot be loaded, otherwise
    /// as [`start`](Self::start).
    pub async fn start_tls(
        self,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
    ) -> Result<(), ServerError> {
        let acceptor = tls::acceptor_from_pem_files(cert_file.as_ref(), key_file.as_ref())?;
        self.bind()
            .await?
            .with_tls(acceptor)
            .serve_with_shutdown(shutdown_signal())
            .await
    }
}

struct Shared {
    router: Router,
    settings: ServerSettings,
}

/// A listening server, ready to accept connections.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    tls: Option<TlsAcceptor>,
}

impl BoundServer {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Terminates TLS on every accepted connection.
    #[must_use]
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Serves connections until `signal` resolves, then shuts down gracefully.
    ///
    /// After the signal no new connections are accepted, idle keep-alive connections are
    /// closed, and responses still in flight are sent with `Connection: close`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ShutdownTimeout`] if connections are still open when the
    /// grace period ends; they are aborted first.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let BoundServer {
            listener,
            local_addr,
            shared,
            tls,
        } = self;
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(signal);

        info!(address = %local_addr, tls = tls.is_some(), "memoserve listening");

        loop {
            tokio::select! {
                () = &mut signal => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "connection accepted");

                    let shared = Arc::clone(&shared);
                    let stop = stop_rx.clone();
                    let tls = tls.clone();
                    connections.spawn(async move {
                        let result = match tls {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(stream) => handle_connection(stream, peer, shared, stop).await,
                                Err(e) => Err(e),
                            },
                            None => handle_connection(stream, peer, shared, stop).await,
                        };
                        if let Err(e) = result {
                            warn!(peer = %peer, error = %e, "connection closed with error");
                        }
                    });
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        info!("shutting down the server");
        drop(listener);
        // Receivers are still alive inside the connection tasks.
        let _ = stop_tx.send(true);

        let grace = shared.settings.shutdown_grace();
        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if timeout(grace, drain).await.is_err() {
            let remaining = connections.len();
            connections.abort_all();
            error!(remaining, "server forced to shutdown");
            return Err(ServerError::ShutdownTimeout { grace, remaining });
        }

        info!("server exiting");
        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Handles a single connection over its lifetime.
///
/// Serves every complete request in the buffer before reading again, so pipelined
/// requests are answered in order. A handler error aborts the connection without a
/// response.
async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    shared: Arc<Shared>,
    mut stop: watch::Receiver<bool>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let settings = &shared.settings;
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let parsed = if buf.is_empty() {
            Err(RequestError::Incomplete)
        } else {
            Request::parse(&buf)
        };

        match parsed {
            Ok((request, body_offset)) => {
                // Content-Length is client-controlled and may overflow.
                let declared = request.content_length().unwrap_or(0);
                let Some(total_needed) = body_offset
                    .checked_add(declared)
                    .filter(|total| *total <= settings.max_request_bytes)
                else {
                    warn!(peer = %peer, declared, "request too large, sending 413");
                    return reject(
                        &mut stream,
                        StatusCode::PayloadTooLarge,
                        TOO_LARGE_BODY,
                        settings,
                    )
                    .await;
                };

                if buf.len() >= total_needed {
                    buf.advance(total_needed);
                    let keep_alive = request.is_keep_alive() && !*stop.borrow();
                    let head_only = *request.method() == Method::Head;

                    debug!(
                        peer = %peer,
                        method = %request.method(),
                        path = %request.path(),
                        "dispatching request"
                    );

                    let mut response = Response::default()
                        .keep_alive(keep_alive)
                        .head_only(head_only);
                    if let Err(e) = shared.router.dispatch(request, &mut response).await {
                        warn!(peer = %peer, error = %e, "handler failed, aborting connection");
                        return Err(e);
                    }
                    write_response(&mut stream, response, settings.write_timeout()).await?;

                    if !keep_alive {
                        debug!(peer = %peer, "closing connection after response");
                        return Ok(());
                    }
                    continue;
                }
            }
            Err(RequestError::Incomplete) => {
                if buf.len() > settings.max_request_bytes {
                    warn!(peer = %peer, "request headers too large, sending 413");
                    return reject(
                        &mut stream,
                        StatusCode::PayloadTooLarge,
                        TOO_LARGE_BODY,
                        settings,
                    )
                    .await;
                }
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "bad request, sending 400");
                let body = format!("Bad Request: {e}");
                return reject(&mut stream, StatusCode::BadRequest, &body, settings).await;
            }
        }

        let read = if buf.is_empty() {
            // Between requests: shutdown closes the connection instead of waiting.
            tokio::select! {
                read = timeout(settings.read_timeout(), stream.read_buf(&mut buf)) => read,
                _ = stop.wait_for(|stopping| *stopping) => {
                    debug!(peer = %peer, "closing idle connection for shutdown");
                    return Ok(());
                }
            }
        } else {
            timeout(settings.read_timeout(), stream.read_buf(&mut buf)).await
        };

        match read {
            Ok(Ok(0)) => {
                debug!(peer = %peer, "connection closed by peer");
                return Ok(());
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(peer = %peer, "read timed out");
                return Ok(());
            }
        }
    }
}

async fn reject<S>(
    stream: &mut S,
    status: StatusCode,
    body: &str,
    settings: &ServerSettings,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = Response::new(status).body(body).keep_alive(false);
    write_response(stream, response, settings.write_timeout()).await
}

async fn write_response<S>(stream: &mut S, response: Response, limit: Duration) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bytes = response.into_bytes();
    let write = async {
        stream.write_all(&bytes).await?;
        stream.flush().await
    };
    match timeout(limit, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "response write timed out",
        )),
    }
}
