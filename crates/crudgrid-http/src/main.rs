use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use crudgrid_crud::MemoryStore;
use crudgrid_http::{CrudHttp, ServerConfig, build_app};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::signal::unix::{SignalKind, signal};

async fn handle(
    req: Request<Incoming>,
    handler: Arc<CrudHttp>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body_bytes = body.collect().await?.to_bytes().to_vec();
    let http_req = Request::from_parts(parts, body_bytes);

    let http_resp = match tokio::task::spawn_blocking(move || handler.handle(http_req)).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(error = %e, "request handler panicked");
            let mut resp = Response::new(Vec::new());
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        }
    };
    let (parts, body_bytes) = http_resp.into_parts();
    Ok(Response::from_parts(
        parts,
        Full::new(Bytes::from(body_bytes)),
    ))
}

async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crudgrid_crud=debug".into()),
        )
        .init();

    let config = ServerConfig::load().unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to load config");
        std::process::exit(1);
    });

    let handler = Arc::new(build_app(&config, Arc::new(MemoryStore::new())));

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, %bind_addr, "failed to bind");
            std::process::exit(1);
        });

    tracing::info!(%bind_addr, grants = config.grants.len(), "listening");

    let http = http1::Builder::new();
    let graceful = GracefulShutdown::new();
    let mut signal = pin!(shutdown_signal());

    loop {
        tokio::select! {
            Ok((stream, _)) = listener.accept() => {
                let io = TokioIo::new(stream);
                let handler = Arc::clone(&handler);
                let conn = http.serve_connection(io, service_fn(move |req| {
                    let handler = Arc::clone(&handler);
                    handle(req, handler)
                }));
                let fut = graceful.watch(conn);
                tokio::spawn(async move {
                    if let Err(e) = fut.await {
                        tracing::warn!(error = %e, "connection error");
                    }
                });
            }
            _ = &mut signal => {
                tracing::info!("shutdown signal received");
                drop(listener);
                break;
            }
        }
    }

    tokio::select! {
        _ = graceful.shutdown() => {
            tracing::info!("shutdown complete");
        }
        _ = tokio::time::sleep(Duration::from_secs(10)) => {
            tracing::warn!("shutdown timed out after 10s");
        }
    }
}
