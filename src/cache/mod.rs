//! Response caching — memoizes whole response bodies by request path.
//!
//! - [`Interceptor`] — a [`ResponseWriter`](crate::http::ResponseWriter) that copies
//!   every body byte it forwards.
//! - [`CacheStore`] — concurrent path → body map, shared by cloning.
//! - [`CacheMiddleware`] — serves hits from the store, captures misses into it.
//!
//! Entries live until the process exits. There is no expiry, eviction, size limit or
//! invalidation.

mod interceptor;
mod middleware;
mod store;

pub use interceptor::Interceptor;
pub use middleware::CacheMiddleware;
pub use store::CacheStore;
