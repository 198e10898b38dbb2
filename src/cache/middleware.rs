//! Whole-response caching keyed by request path.

use tracing::info;

use super::{CacheStore, Interceptor};
use crate::context::Context;
use crate::http::ResponseWriter;
use crate::middleware::{BoxFuture, HandlerResult, Middleware, Next};

/// Serves repeated requests for a path from a [`CacheStore`].
///
/// - **Hit** — the stored body is written as the whole response and the wrapped handler
///   is not called. No status is set, so the writer's default `200 OK` applies.
/// - **Miss** — the wrapped handler runs against an [`Interceptor`]; once it returns, the
///   captured body is stored under the path. This happens whatever the handler did:
///   empty bodies, error statuses and bodies cut short by a failed write are all stored
///   as-is, and the handler's own result is returned afterwards.
///
/// The key is the path alone. Method and query string are ignored, so `GET /x?a=1` and
/// `POST /x` share an entry.
///
/// # Examples
///
/// ```rust
/// use memoserve::cache::{CacheMiddleware, CacheStore};
/// use memoserve::middleware::Chain;
///
/// let store = CacheStore::new();
/// let mut chain = Chain::new();
/// chain.push(CacheMiddleware::new(store.clone()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CacheMiddleware {
    store: CacheStore,
}

impl CacheMiddleware {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }
}

impl Middleware for CacheMiddleware {
    fn handle<'w>(
        &self,
        ctx: Context,
        writer: &'w mut dyn ResponseWriter,
        next: Next,
    ) -> BoxFuture<'w, HandlerResult> {
        let store = self.store.clone();

        Box::pin(async move {
            let path = ctx.path().to_owned();

            if let Some(body) = store.load(&path) {
                info!(%path, "cache hit");
                return writer.write_all(&body);
            }

            info!(%path, "cache miss");
            let mut interceptor = Interceptor::new(writer);
            let result = next.run(ctx, &mut interceptor).await;
            store.store(path, interceptor.into_captured());
            result
        })
    }
}
