//! Echo server
//!
//! Configured from `H1SERVE_*` environment variables. Answers every request
//! with a summary of what it received; `/stream` answers with a chunked
//! body instead. Ctrl-C stops accepting and waits for in-flight requests.

use bytes::Bytes;
use h1serve::config::ServerConfig;
use h1serve::http::{HandlerResult, HttpRequest, HttpResponse, HttpServer, Status, StreamingResponse};
use h1serve::net::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

fn echo(request: HttpRequest, connection: &Connection) -> HandlerResult {
    if request.path() == "/stream" {
        let chunks = ["streamed ", "in ", "pieces\n"].map(Bytes::from);
        let response = StreamingResponse::from_chunks(Status::OK, chunks)
            .with_header("Content-Type", "text/plain");
        return Ok(response.into());
    }

    let mut summary = format!("{} {} {}\n", request.method(), request.target(), request.version());
    if let Some(peer) = connection.peer_addr() {
        summary.push_str(&format!("peer: {}\n", peer));
    }
    summary.push_str(&request.headers().to_string());
    summary.push_str(&format!("body: {} bytes\n", request.body().len()));

    Ok(HttpResponse::builder()
        .status(Status::OK)
        .header("Content-Type", "text/plain")
        .body(summary)
        .build()
        .into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;

    let level = if config.verbose() {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .init();

    tracing::info!(
        host = config.host(),
        port = config.port(),
        workers = config.workers(),
        media_root = %config.media_root().display(),
        "starting"
    );

    // SAFETY: the handler only stores to an atomic.
    unsafe {
        libc::signal(
            libc::SIGINT,
            on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }

    let server = Arc::new(HttpServer::new(config, echo));

    let watcher = Arc::clone(&server);
    thread::spawn(move || {
        while !INTERRUPTED.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }
        tracing::info!("Shutdown signal received");
        watcher.finish();
    });

    server.listen_and_serve()?;
    tracing::info!("stopped");
    Ok(())
}
