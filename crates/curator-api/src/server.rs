//! HTTP server for the API surface
//!
//! hyper http1 with one spawned task per connection. Requests are framed,
//! their bodies collected, and everything else is [`router::dispatch`].

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::router::{dispatch, AppState};
use crate::types::ErrorBody;

/// Upper bound on accepted request bodies (metadata only; payload bytes
/// move through transfer managers, not this surface)
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// The API server
pub struct ApiServer {
    state: Arc<AppState>,
    addr: SocketAddr,
}

impl ApiServer {
    /// Creates a server bound to `host:port` once run
    pub fn new(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<Self> {
        let addr: SocketAddr = format!("{host}:{port}").parse()?;
        Ok(Self { state, addr })
    }

    /// Accept loop; runs until the token is cancelled
    pub async fn run(&self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "API server listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, remote) = result?;
                    let io = TokioIo::new(stream);
                    let state = Arc::clone(&self.state);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(req, &state).await }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            error!(remote = %remote, error = %e, "API connection error");
                        }
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("API server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Frames one request into a dispatch call
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: &AppState,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let auth_header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(endpoint) = path.strip_prefix("/api/v1/").map(str::to_string) else {
        return Ok(json_response(
            StatusCode::NOT_FOUND,
            &ErrorBody {
                error: format!("no such path: {path}"),
            },
        ));
    };

    let body = match collect_body(req).await {
        Ok(body) => body,
        Err(response) => return Ok(response),
    };

    match dispatch(state, &method, &endpoint, auth_header.as_deref(), &body).await {
        Ok(value) => Ok(json_response(StatusCode::OK, &value)),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Ok(json_response(
                status,
                &ErrorBody {
                    error: e.to_string(),
                },
            ))
        }
    }
}

/// Collects the request body up to the size bound
async fn collect_body(
    req: Request<hyper::body::Incoming>,
) -> Result<Vec<u8>, Response<Full<Bytes>>> {
    let body = req.into_body();
    let collected = body.collect().await.map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            &ErrorBody {
                error: format!("failed to read body: {e}"),
            },
        )
    })?;
    let bytes = collected.to_bytes();
    if bytes.len() > MAX_BODY_BYTES {
        return Err(json_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &ErrorBody {
                error: "request body too large".to_string(),
            },
        ));
    }
    Ok(bytes.to_vec())
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let encoded = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(encoded)))
        .expect("static response construction cannot fail")
}
