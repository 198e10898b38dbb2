//! # memoserve
//!
//! An async HTTP/1.1 server with a composable middleware pipeline and whole-response
//! caching keyed by request path.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memoserve::Server;
//! use memoserve::cache::{CacheMiddleware, CacheStore};
//! use memoserve::config::ServerSettings;
//! use memoserve::http::ResponseWriter;
//! use memoserve::middleware::{LoggerMiddleware, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerSettings::default());
//!     server.add_middleware(LoggerMiddleware);
//!     server.add_middleware(CacheMiddleware::new(CacheStore::new()));
//!     server.add_route("/", handler_fn(|_ctx, w| {
//!         Box::pin(async move { w.write_all(b"Hello, World!\n") })
//!     }));
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;
pub mod static_files;
pub mod telemetry;

pub use http::{Headers, Method, Request, Response, ResponseWriter, StatusCode};
pub use server::{Server, ServerError};
