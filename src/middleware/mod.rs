//! Middleware pipeline — handlers wrapped in layers of cross-cutting behavior.
//!
//! ## Core types
//!
//! - [`Handler`] — type-erased, cheaply-cloneable async handler writing into a
//!   [`ResponseWriter`].
//! - [`handler_fn`] — turns a closure into a [`Handler`].
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — the handler a middleware wraps; call [`Next::run`] to delegate.
//! - [`Chain`] — ordered middleware list that wraps terminal handlers.
//! - [`LoggerMiddleware`] — built-in request logger.
//!
//! ## Ordering
//!
//! For middleware `[m1, m2, …, mn]` registered in that order around handler `H`,
//! [`Chain::wrap`] produces `m1(m2(…mn(H)…))`: `m1` sees the request first and
//! the finished response last, `mn` sits directly around `H`.
//!
//! Wrapping happens once. The returned [`Handler`] owns its own copy of the layers, so
//! middleware pushed onto the chain afterwards never reaches it.

use std::{future::Future, io, pin::Pin, sync::Arc};

use tokio::time::Instant;
use tracing::{info, warn};

use crate::{context::Context, http::ResponseWriter};

/// A pinned, boxed, `Send` future borrowing for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What handlers and middleware return. An `Err` is a failed write to the response
/// sink (or any other I/O failure) and is handed to the serving layer untouched.
pub type HandlerResult = io::Result<()>;

/// A type-erased, reference-counted async handler.
///
/// The returned future borrows the writer for as long as it runs, which is why handlers
/// are written with an explicit `Box::pin(async move { … })`. Build one with
/// [`handler_fn`].
pub type Handler = Arc<
    dyn for<'w> Fn(Context, &'w mut dyn ResponseWriter) -> BoxFuture<'w, HandlerResult>
        + Send
        + Sync
        + 'static,
>;

/// Converts a closure into a [`Handler`].
///
/// # Examples
///
/// ```rust
/// use memoserve::http::ResponseWriter;
/// use memoserve::middleware::{Handler, handler_fn};
///
/// let hello: Handler = handler_fn(|_ctx, w| {
///     Box::pin(async move { w.write_all(b"Hello!") })
/// });
/// ```
pub fn handler_fn<F>(f: F) -> Handler
where
    F: for<'w> Fn(Context, &'w mut dyn ResponseWriter) -> BoxFuture<'w, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// The handler directly inside a middleware layer.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware delegates at most once
/// per request. Dropping it without running short-circuits the rest of the chain.
pub struct Next {
    inner: Handler,
}

impl Next {
    pub fn new(inner: Handler) -> Self {
        Self { inner }
    }

    /// Runs the wrapped handler against `writer`.
    ///
    /// Middleware may pass a different writer than the one it received, typically one
    /// that wraps it.
    pub async fn run(self, ctx: Context, writer: &mut dyn ResponseWriter) -> HandlerResult {
        (self.inner)(ctx, writer).await
    }
}

/// The core trait for all middleware.
///
/// Implementors receive the request [`Context`], the response writer, and the [`Next`]
/// handler. They may:
///
/// - **Pass through** — `next.run(ctx, writer).await`.
/// - **Short-circuit** — write a response themselves and drop `next`.
/// - **Observe** — hand `next` a wrapping writer and inspect what it saw afterwards.
///
/// The returned future may borrow `writer` but not `self`; clone whatever state the
/// future needs before boxing it.
pub trait Middleware: Send + Sync {
    fn handle<'w>(
        &self,
        ctx: Context,
        writer: &'w mut dyn ResponseWriter,
        next: Next,
    ) -> BoxFuture<'w, HandlerResult>;
}

/// An ordered middleware list, outermost first.
///
/// # Examples
///
/// ```rust
/// use memoserve::middleware::{Chain, LoggerMiddleware, handler_fn};
/// use memoserve::http::ResponseWriter;
///
/// let mut chain = Chain::new();
/// chain.push(LoggerMiddleware);
///
/// let handler = chain.wrap(handler_fn(|_ctx, w| {
///     Box::pin(async move { w.write_all(b"ok") })
/// }));
/// ```
#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer; it ends up inside every layer already pushed.
    pub fn push<M>(&mut self, middleware: M)
    where
        M: Middleware + 'static,
    {
        self.layers.push(Arc::new(middleware));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wraps `terminal` in every layer, first-pushed outermost.
    ///
    /// Folds from the innermost layer outwards. The result captures the layers present
    /// now and nothing else.
    pub fn wrap(&self, terminal: Handler) -> Handler {
        self.layers
            .iter()
            .rev()
            .fold(terminal, |inner, layer| wrap_layer(Arc::clone(layer), inner))
    }
}

fn wrap_layer(layer: Arc<dyn Middleware>, inner: Handler) -> Handler {
    handler_fn(move |ctx, writer| layer.handle(ctx, writer, Next::new(Arc::clone(&inner))))
}

/// Logs each request on the way in and its outcome on the way out.
///
/// Never short-circuits.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle<'w>(
        &self,
        ctx: Context,
        writer: &'w mut dyn ResponseWriter,
        next: Next,
    ) -> BoxFuture<'w, HandlerResult> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().clone();
            let path = ctx.path().to_owned();

            info!(%method, %path, "received request");

            let result = next.run(ctx, writer).await;

            match &result {
                Ok(()) => info!(%method, %path, elapsed = ?start.elapsed(), "request completed"),
                Err(e) => warn!(%method, %path, error = %e, "request failed"),
            }
            result
        })
    }
}
