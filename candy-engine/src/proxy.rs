//! Reverse-proxy data plane
//!
//! Host-matched terminal routes: the request's host picks an upstream, the
//! request is replayed against it over HTTP/1.1, and anything without a
//! route is rejected.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, HOST};
use http::{Request, Response, StatusCode, Uri, Version};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use parking_lot::RwLock;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Handler};
use crate::listen::Listener;

type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// State shared by every connection.
pub(crate) struct SharedState {
    /// host -> upstream dial string
    routes: RwLock<HashMap<String, String>>,
    client: Client<HttpConnector, Incoming>,
}

impl SharedState {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            routes: RwLock::new(route_table(config)),
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    /// Swaps in the route table of a newly applied configuration.
    pub(crate) fn apply(&self, config: &Config) {
        *self.routes.write() = route_table(config);
    }

    pub(crate) fn lookup(&self, host: &str) -> Option<String> {
        self.routes.read().get(host).cloned()
    }
}

/// Flattens every server's host-matched reverse-proxy routes into one
/// lookup table. The servers carry the same route set, so the first dial
/// for a host wins.
fn route_table(config: &Config) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for server in config.apps.http.servers.values() {
        for route in &server.routes {
            let Some(Handler::ReverseProxy { upstreams, .. }) = route.handle.first() else {
                continue;
            };
            let Some(upstream) = upstreams.first() else {
                continue;
            };
            for matcher in &route.matchers {
                for host in &matcher.host {
                    table
                        .entry(host.to_ascii_lowercase())
                        .or_insert_with(|| upstream.dial.clone());
                }
            }
        }
    }
    table
}

/// Accepts cleartext connections (HTTP/1.1 and h2c) until shutdown.
pub(crate) async fn serve_plain(
    listener: Listener,
    state: Arc<SharedState>,
    shutdown: CancellationToken,
) {
    accept_loop(listener, shutdown, move |stream, peer| {
        let state = state.clone();
        async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle(req, state, "http", peer).await) }
            });
            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                tracing::debug!(%err, "proxy connection error");
            }
        }
    })
    .await;
}

/// Accepts TLS connections until shutdown; certificates come from the
/// engine's local issuer via SNI.
pub(crate) async fn serve_tls(
    listener: Listener,
    acceptor: TlsAcceptor,
    state: Arc<SharedState>,
    shutdown: CancellationToken,
) {
    accept_loop(listener, shutdown, move |stream, peer| {
        let state = state.clone();
        let acceptor = acceptor.clone();
        async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::debug!(%err, "TLS handshake failed");
                    return;
                }
            };
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle(req, state, "https", peer).await) }
            });
            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                tracing::debug!(%err, "proxy connection error");
            }
        }
    })
    .await;
}

async fn accept_loop<F, Fut>(listener: Listener, shutdown: CancellationToken, serve: F)
where
    F: Fn(crate::listen::Stream, Option<SocketAddr>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve(stream, peer));
                }
                Err(err) => {
                    tracing::warn!(%err, "accept error");
                }
            }
        }
    }
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<SharedState>,
    scheme: &'static str,
    peer: Option<SocketAddr>,
) -> Response<ProxyBody> {
    let Some(host) = request_host(&req) else {
        return text_response(StatusCode::BAD_REQUEST, "missing host");
    };

    let Some(dial) = state.lookup(&host) else {
        tracing::debug!(%host, "no route for host");
        return text_response(StatusCode::NOT_FOUND, "no route for host");
    };

    let (mut parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = match format!("http://{dial}{path_and_query}").parse() {
        Ok(uri) => uri,
        Err(err) => {
            tracing::warn!(%dial, %err, "invalid upstream address");
            return text_response(StatusCode::BAD_GATEWAY, "invalid upstream");
        }
    };
    parts.uri = uri;
    // The upstream leg is always HTTP/1.1, whatever the downstream spoke.
    parts.version = Version::HTTP_11;

    if let Ok(value) = HeaderValue::from_str(&dial) {
        parts.headers.insert(HOST, value);
    }
    if let Ok(value) = HeaderValue::from_str(&host) {
        parts.headers.insert("x-forwarded-host", value);
    }
    parts
        .headers
        .insert("x-forwarded-proto", HeaderValue::from_static(scheme));
    if let Some(peer) = peer {
        if let Ok(value) = HeaderValue::from_str(&peer.ip().to_string()) {
            parts.headers.insert("x-forwarded-for", value);
        }
    }

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => response.map(|body| body.boxed()),
        Err(err) => {
            tracing::warn!(%host, %dial, %err, "upstream request failed");
            text_response(StatusCode::BAD_GATEWAY, "upstream unreachable")
        }
    }
}

/// The request's host: the URI authority for HTTP/2, the `Host` header for
/// HTTP/1.1. Ports are stripped, brackets kept for IPv6 literals.
fn request_host<B>(req: &Request<B>) -> Option<String> {
    let raw = match req.uri().authority() {
        Some(authority) => authority.as_str().to_string(),
        None => req.headers().get(HOST)?.to_str().ok()?.to_string(),
    };
    Some(strip_port(&raw).to_ascii_lowercase())
}

fn strip_port(host: &str) -> &str {
    if let Some(end) = host.rfind(']') {
        // Bracketed IPv6, with or without a port
        return &host[..=end];
    }
    match host.rsplit_once(':') {
        Some((name, _)) => name,
        None => host,
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)).map_err(|err| match err {}).boxed())
        .expect("static response")
}
