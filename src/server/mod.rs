//! HTTP Server
//!
//! Serves peers and operators from one listener:
//!
//! | Route | Response |
//! |---|---|
//! | `GET {base_path}{group}/{key}` | value bytes, 404 if the key has no value |
//! | `GET /healthz`, `/livez`, `/readyz` | `ok` |
//! | `GET /metrics` | Prometheus text |
//! | `GET /stats` | JSON array of group snapshots |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::group::GroupRegistry;
use crate::monitoring;
use crate::peers::{normalize_base_path, EXPIRES_HEADER};

/// Shared state of the request handlers
#[derive(Debug)]
pub struct ServerState {
    groups: Arc<GroupRegistry>,
    base_path: String,
    request_timeout: Duration,
}

impl ServerState {
    pub fn new(groups: Arc<GroupRegistry>, base_path: &str, request_timeout: Duration) -> Self {
        Self {
            groups,
            base_path: normalize_base_path(base_path),
            request_timeout,
        }
    }

    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

/// Bind a listener on `addr`
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid listen address {}: {}", addr, e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", addr, e)))?;

    info!("Server listening on {}", addr);
    Ok(listener)
}

/// Accept connections until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let (stream, remote) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("Server accept error: {}", e)))?,
        };

        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(state.clone(), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%remote, "Connection error: {}", e);
            }
        });
    }
}

async fn handle(
    state: Arc<ServerState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(&state, req.method(), req.uri().path()).await)
}

/// Dispatch one request
pub async fn route(state: &ServerState, method: &Method, path: &str) -> Response<Full<Bytes>> {
    if method != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match path {
        "/healthz" | "/livez" | "/readyz" => text(StatusCode::OK, "ok"),
        "/metrics" => match monitoring::render(&state.groups) {
            Ok(body) => with_content_type(
                response(StatusCode::OK, Bytes::from(body)),
                monitoring::CONTENT_TYPE,
            ),
            Err(e) => {
                error!("Failed to render metrics: {}", e);
                error_response(&e)
            }
        },
        "/stats" => match serde_json::to_vec(&state.groups.stats()) {
            Ok(body) => with_content_type(
                response(StatusCode::OK, Bytes::from(body)),
                "application/json",
            ),
            Err(e) => error_response(&Error::Internal(e.to_string())),
        },
        _ => match path.strip_prefix(state.base_path.as_str()) {
            Some(rest) => serve_value(state, rest).await,
            None => text(StatusCode::NOT_FOUND, "not found"),
        },
    }
}

/// Answer `{group}/{key}` for a peer
async fn serve_value(state: &ServerState, rest: &str) -> Response<Full<Bytes>> {
    let Some((group, key)) = rest.split_once('/') else {
        return text(StatusCode::BAD_REQUEST, "expected {group}/{key}");
    };
    let (group, key) = match (urlencoding::decode(group), urlencoding::decode(key)) {
        (Ok(group), Ok(key)) => (group, key),
        _ => return text(StatusCode::BAD_REQUEST, "invalid percent-encoding"),
    };

    let group = match state.groups.require(&group) {
        Ok(group) => group,
        Err(e) => return error_response(&e),
    };
    group.record_server_request();

    let cancel = CancellationToken::new();
    let result = tokio::time::timeout(state.request_timeout, group.get_value(&key, &cancel))
        .await
        .unwrap_or(Err(Error::Cancelled));

    match result {
        Ok(value) => {
            let expires_in = value.ttl_remaining();
            let mut res = with_content_type(
                response(StatusCode::OK, value.into_bytes()),
                "application/octet-stream",
            );
            if let Some(ttl) = expires_in {
                res.headers_mut()
                    .insert(EXPIRES_HEADER, HeaderValue::from(ttl.as_millis() as u64));
            }
            res
        }
        Err(e) => {
            if !e.is_not_found() {
                warn!(group = group.name(), key = %key, error = %e, "Peer request failed");
            }
            error_response(&e)
        }
    }
}

/// HTTP status for an error
pub fn status_for(err: &Error) -> StatusCode {
    match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::GroupNotFound => StatusCode::BAD_REQUEST,
        ErrorKind::TransportFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::LoaderFailure | ErrorKind::Config | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: &Error) -> Response<Full<Bytes>> {
    text(status_for(err), &err.to_string())
}

fn response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(body));
    *res.status_mut() = status;
    res
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    with_content_type(
        response(status, Bytes::from(body.to_string())),
        "text/plain; charset=utf-8",
    )
}

fn with_content_type(
    mut res: Response<Full<Bytes>>,
    content_type: &'static str,
) -> Response<Full<Bytes>> {
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    res
}
