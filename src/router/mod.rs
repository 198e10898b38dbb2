//! Request routing — map URL patterns (and optionally methods) to handlers.
//!
//! Three pattern styles are supported:
//!
//! | Pattern              | Example match              | Captured params                 |
//! |----------------------|----------------------------|---------------------------------|
//! | `/users`             | `/users`                   | *(none)*                        |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                     |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so `/users/` and
//! `/users` are treated as equivalent.
//!
//! Routes are matched in registration order; the first route whose method and pattern both
//! match the incoming request wins. Routes registered with [`Router::any`] match every
//! method.

use crate::context::{Context, PathParams};
use crate::http::{Method, Request, ResponseWriter, StatusCode};
use crate::middleware::{Handler, HandlerResult};

/// Name of the parameter a trailing `/*` captures into.
pub const WILDCARD_PARAM: &str = "wildcard";

/// Body written when no route matches.
pub const NOT_FOUND_BODY: &[u8] = b"404 page not found\n";

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
    // Everything under the prefix, e.g. `/files/*`.
    Wildcard(String),
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

impl Pattern {
    /// Classifies a pattern: trailing `/*` → wildcard, any `:` → parameterized,
    /// otherwise exact.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();

            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }
                Some(params)
            }
            Pattern::Wildcard(prefix) => {
                let suffix = path.strip_prefix(prefix.as_str())?;
                // `/files/*` must not match `/filesystem`.
                if !suffix.is_empty() && !suffix.starts_with('/') {
                    return None;
                }
                let mut params = PathParams::new();
                params.insert(WILDCARD_PARAM.to_string(), suffix.to_string());
                Some(params)
            }
        }
    }
}

struct Route {
    // `None` matches every method.
    method: Option<Method>,
    pattern: Pattern,
    handler: Handler,
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        match &self.method {
            Some(m) if m != method => None,
            _ => self.pattern.matches(path),
        }
    }
}

/// The route table: patterns bound to already-composed handlers.
///
/// When no route matches, [`dispatch`](Self::dispatch) writes `404 Not Found`.
///
/// # Examples
///
/// ```rust
/// use memoserve::http::{Method, ResponseWriter};
/// use memoserve::middleware::handler_fn;
/// use memoserve::router::Router;
///
/// let mut router = Router::new();
/// router.any("/ping", handler_fn(|_ctx, w| Box::pin(async move { w.write_all(b"pong") })));
/// router.on(Method::Get, "/users/:id", handler_fn(|ctx, w| {
///     let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///     Box::pin(async move { w.write_all(id.as_bytes()) })
/// }));
/// assert_eq!(router.len(), 2);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for every method on `pattern`.
    pub fn any(&mut self, pattern: &str, handler: Handler) {
        self.push(None, pattern, handler);
    }

    /// Registers `handler` for `method` requests on `pattern`.
    pub fn on(&mut self, method: Method, pattern: &str, handler: Handler) {
        self.push(Some(method), pattern, handler);
    }

    fn push(&mut self, method: Option<Method>, pattern: &str, handler: Handler) {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(pattern),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Runs the first matching route's handler against `writer`.
    ///
    /// # Errors
    ///
    /// Whatever the handler (or the writer, for the 404 body) returned.
    pub async fn dispatch(
        &self,
        request: Request,
        writer: &mut dyn ResponseWriter,
    ) -> HandlerResult {
        let found = self
            .routes
            .iter()
            .find_map(|route| Some((route, route.matches(request.method(), request.path())?)));

        match found {
            Some((route, params)) => {
                (route.handler)(Context::with_params(request, params), writer).await
            }
            None => {
                writer.write_status(StatusCode::NotFound);
                writer.write_all(NOT_FOUND_BODY)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Response;
    use crate::middleware::handler_fn;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    fn replying(body: &'static str) -> Handler {
        handler_fn(move |_ctx, w| Box::pin(async move { w.write_all(body.as_bytes()) }))
    }

    async fn send(router: &Router, method: &str, path: &str) -> Response {
        let mut res = Response::default();
        router
            .dispatch(make_request(method, path), &mut res)
            .await
            .unwrap();
        res
    }

    #[test]
    fn pattern_parse_classifies() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
        assert!(matches!(Pattern::parse("/users/"), Pattern::Exact(s) if s == "/users"));
        assert!(matches!(Pattern::parse("/files/*"), Pattern::Wildcard(s) if s == "/files"));
        match Pattern::parse("/users/:id/posts/:post_id") {
            Pattern::Parameterized { segments } => {
                assert_eq!(segments.len(), 4);
                assert!(matches!(&segments[0], Segment::Static(s) if s == "users"));
                assert!(matches!(&segments[3], Segment::Parameter(s) if s == "post_id"));
            }
            other => panic!("expected Parameterized, got {other:?}"),
        }
    }

    #[test]
    fn exact_pattern_matches_with_trailing_slash_normalized() {
        let pat = Pattern::parse("/users");
        assert!(pat.matches("/users").is_some());
        assert!(pat.matches("/users/").is_some());
        assert!(pat.matches("/posts").is_none());

        let root = Pattern::parse("/");
        assert!(root.matches("/").is_some());
        assert!(root.matches("/other").is_none());
    }

    #[test]
    fn parameterized_pattern_extracts_values() {
        let pat = Pattern::parse("/users/:id/posts/:post_id");
        let params = pat.matches("/users/7/posts/99").unwrap();
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("post_id"), Some("99"));
        assert!(pat.matches("/users/7").is_none());
        assert!(pat.matches("/people/7/posts/99").is_none());
    }

    #[test]
    fn wildcard_captures_tail_on_segment_boundary() {
        let pat = Pattern::parse("/static/*");
        let params = pat.matches("/static/css/site.css").unwrap();
        assert_eq!(params.get(WILDCARD_PARAM), Some("/css/site.css"));
        assert_eq!(pat.matches("/static").unwrap().get(WILDCARD_PARAM), Some(""));
        assert!(pat.matches("/statics/x").is_none());
    }

    #[tokio::test]
    async fn unmatched_path_gets_404() {
        let mut router = Router::new();
        router.any("/hello", replying("hi"));
        let res = send(&router, "GET", "/world").await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(res.content(), NOT_FOUND_BODY);
    }

    #[tokio::test]
    async fn any_route_accepts_every_method() {
        let mut router = Router::new();
        router.any("/r", replying("any"));
        for method in ["GET", "POST", "DELETE", "PURGE"] {
            assert_eq!(send(&router, method, "/r").await.content(), b"any");
        }
    }

    #[tokio::test]
    async fn method_route_only_matches_its_method() {
        let mut router = Router::new();
        router.on(Method::Post, "/submit", replying("posted"));
        assert_eq!(send(&router, "POST", "/submit").await.content(), b"posted");
        assert_eq!(
            send(&router, "GET", "/submit").await.status(),
            StatusCode::NotFound
        );
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.any("/path", replying("first"));
        router.any("/path", replying("second"));
        assert_eq!(send(&router, "GET", "/path").await.content(), b"first");
    }

    #[tokio::test]
    async fn handler_sees_path_params() {
        let mut router = Router::new();
        router.on(
            Method::Get,
            "/users/:id",
            handler_fn(|ctx, w| {
                let id = ctx.params().get("id").unwrap_or_default().to_owned();
                Box::pin(async move { w.write_all(id.as_bytes()) })
            }),
        );
        assert_eq!(send(&router, "GET", "/users/42").await.content(), b"42");
    }
}
