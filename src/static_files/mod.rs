//! Serving files from a directory.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::Context;
use crate::http::{ResponseWriter, StatusCode};
use crate::middleware::{Handler, HandlerResult, handler_fn};
use crate::router::{NOT_FOUND_BODY, WILDCARD_PARAM};

const INDEX_FILE: &str = "index.html";

/// Serves files below a root directory.
///
/// The file is chosen by the route's `*` capture when there is one (so
/// `/static/*` maps `/static/css/site.css` to `<root>/css/site.css`), otherwise by the
/// full request path. Directories serve their `index.html`. Paths that try to climb out
/// of the root with `..` are answered like missing files.
///
/// # Examples
///
/// ```rust,no_run
/// use memoserve::{Server, config::ServerSettings};
/// use memoserve::static_files::StaticFiles;
///
/// let mut server = Server::new(ServerSettings::default());
/// server.add_route("/static/*", StaticFiles::new("./static").into_handler());
/// ```
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: Arc<PathBuf>,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn into_handler(self) -> Handler {
        handler_fn(move |ctx, w| {
            let files = self.clone();
            Box::pin(async move { files.serve(ctx, w).await })
        })
    }

    async fn serve(&self, ctx: Context, w: &mut dyn ResponseWriter) -> HandlerResult {
        let requested = ctx.params().get(WILDCARD_PARAM).unwrap_or(ctx.path());
        let Some(relative) = sanitize(requested) else {
            debug!(path = %ctx.path(), "rejected path outside static root");
            return not_found(w);
        };

        let mut target = self.root.join(relative);
        if tokio::fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
            target.push(INDEX_FILE);
        }

        match tokio::fs::read(&target).await {
            Ok(contents) => {
                let mime = mime_guess::from_path(&target).first_or_octet_stream();
                w.headers_mut().set("Content-Type", mime.essence_str());
                w.write_all(&contents)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => not_found(w),
            Err(e) => {
                warn!(file = %target.display(), error = %e, "failed to read static file");
                w.write_status(StatusCode::InternalServerError);
                w.write_all(b"500 internal server error\n")
            }
        }
    }
}

fn not_found(w: &mut dyn ResponseWriter) -> HandlerResult {
    w.write_status(StatusCode::NotFound);
    w.write_all(NOT_FOUND_BODY)
}

// Keeps only normal components; `None` if the path tries to leave the root.
fn sanitize(requested: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(requested.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}
