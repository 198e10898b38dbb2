use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use memoserve::{
    Server,
    cache::{CacheMiddleware, CacheStore},
    config::{self, CliArgs, Settings},
    http::ResponseWriter,
    middleware::{LoggerMiddleware, handler_fn},
    static_files::StaticFiles,
    telemetry,
};

const WELCOME: &[u8] = b"Welcome to memoserve!\n";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let settings = match config::load(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("memoserve: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = telemetry::init(&settings.logging) {
        eprintln!("memoserve: {err}");
        return ExitCode::FAILURE;
    }

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<(), memoserve::ServerError> {
    let tls = settings
        .server
        .tls_files()
        .map(|(cert, key)| (cert.clone(), key.clone()));
    let static_dir = settings.server.static_dir.clone();

    let mut server = Server::new(settings.server);
    server.add_middleware(LoggerMiddleware);
    server.add_middleware(CacheMiddleware::new(CacheStore::new()));

    server.add_route(
        "/",
        handler_fn(|_ctx, w| Box::pin(async move { w.write_all(WELCOME) })),
    );
    server.add_route("/static/*", StaticFiles::new(static_dir).into_handler());

    match tls {
        Some((cert, key)) => {
            info!(cert = %cert.display(), "serving over TLS");
            server.start_tls(cert, key).await
        }
        None => server.start().await,
    }
}
