//! Admin control plane
//!
//! A local HTTP endpoint through which the running configuration is
//! replaced (`POST /load`), read back (`GET /config/...`), and the engine
//! stopped (`POST /stop`). Requests must identify the endpoint they think
//! they are talking to: a TCP admin endpoint accepts its own `host:port` as
//! `Host` or `Origin`, a unix-socket endpoint accepts only an empty `Host`.

use bytes::Bytes;
use http::header::{HOST, ORIGIN};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio_util::sync::CancellationToken;

use crate::listen::{ListenAddr, Listener};
use crate::{Config, Engine};

/// Requests larger than this are rejected outright.
const MAX_BODY: usize = 4 * 1024 * 1024;

/// Serves the admin endpoint until shutdown.
pub(crate) async fn serve(
    listener: Listener,
    addr: ListenAddr,
    engine: Engine,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(%err, "admin accept error");
                    continue;
                }
            }
        };

        let io = TokioIo::new(stream);
        let engine = engine.clone();
        let addr = addr.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let engine = engine.clone();
                let addr = addr.clone();
                async move { Ok::<_, std::convert::Infallible>(handle(req, engine, &addr).await) }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(%err, "admin connection error");
            }
        });
    }
}

async fn handle(req: Request<Incoming>, engine: Engine, addr: &ListenAddr) -> Response<Full<Bytes>> {
    if !host_allowed(&req, addr) {
        return response(StatusCode::FORBIDDEN, "host not allowed");
    }

    let path = req.uri().path().to_string();
    match (req.method().clone(), path.as_str()) {
        (Method::POST, "/load") => load(req, engine).await,
        (Method::POST, "/stop") => {
            tracing::info!("stop requested via admin endpoint");
            engine.stop();
            response(StatusCode::OK, "")
        }
        (Method::GET, path) if path == "/config" || path.starts_with("/config/") => {
            let value = engine.config_value();
            let suffix = path.strip_prefix("/config").unwrap_or("");
            match traverse(&value, suffix) {
                Some(found) => json_response(found),
                None => response(StatusCode::NOT_FOUND, "unknown config path"),
            }
        }
        _ => response(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn load(req: Request<Incoming>, engine: Engine) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => return response(StatusCode::BAD_REQUEST, &format!("failed to read body: {err}")),
    };
    if body.len() > MAX_BODY {
        return response(StatusCode::PAYLOAD_TOO_LARGE, "config too large");
    }

    let config: Config = match serde_json::from_slice(&body) {
        Ok(config) => config,
        Err(err) => return response(StatusCode::BAD_REQUEST, &format!("invalid config: {err}")),
    };

    match engine.apply(config) {
        Ok(()) => {
            tracing::info!("configuration reloaded via admin endpoint");
            response(StatusCode::OK, "")
        }
        Err(err) => response(StatusCode::BAD_REQUEST, &format!("load failed: {err}")),
    }
}

/// The engine's host check (see module docs).
fn host_allowed<B>(req: &Request<B>, addr: &ListenAddr) -> bool {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .strip_prefix("http://")
                .or_else(|| value.strip_prefix("https://"))
                .unwrap_or(value)
        });

    match addr {
        ListenAddr::Unix(_) => host.is_empty(),
        ListenAddr::Tcp(tcp) => host == tcp || origin == Some(tcp.as_str()),
    }
}

/// Walks a JSON value by `/`-separated object keys and array indexes.
fn traverse<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response")
}

fn json_response(value: &serde_json::Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(value).unwrap_or_default();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response")
}
