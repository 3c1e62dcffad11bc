//! Metrics module
//!
//! Process-wide Prometheus counters and the HTTP endpoint that exposes them.
//!
//! | Metric                               | Labels                  |
//! |--------------------------------------|-------------------------|
//! | `shardstore_fragments_stored_total`  |                         |
//! | `shardstore_bytes_stored_total`      |                         |
//! | `shardstore_fragments_served_total`  |                         |
//! | `shardstore_operations_total`        | `operation`, `result`   |
//! | `shardstore_fragments_repaired_total`|                         |
//! | `shardstore_message_errors_total`    | `channel`               |

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{Error, Result};

// =============================================================================
// Counters
// =============================================================================

/// Fragments persisted by this process
pub static FRAGMENTS_STORED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "shardstore_fragments_stored_total",
        "Fragments persisted to local chunk files"
    )
    .expect("metric registration")
});

/// Chunk bytes written by this process
pub static BYTES_STORED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "shardstore_bytes_stored_total",
        "Chunk bytes written to local storage"
    )
    .expect("metric registration")
});

/// Read requests answered with at least one chunk
pub static FRAGMENTS_SERVED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "shardstore_fragments_served_total",
        "Fragment read requests answered from local storage"
    )
    .expect("metric registration")
});

/// Coordinator operations by outcome
pub static OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "shardstore_operations_total",
        "Store, retrieve and repair operations",
        &["operation", "result"]
    )
    .expect("metric registration")
});

/// Fragments regenerated and re-placed by repair
pub static FRAGMENTS_REPAIRED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "shardstore_fragments_repaired_total",
        "Fragments regenerated by repair"
    )
    .expect("metric registration")
});

/// Messages that could not be decoded or handled
pub static MESSAGE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "shardstore_message_errors_total",
        "Messages dropped because they could not be decoded or handled",
        &["channel"]
    )
    .expect("metric registration")
});

/// Count one coordinator operation.
///
/// Rejected input is counted as `invalid`, apart from cluster failures.
pub fn record_operation<T>(operation: &str, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) if e.is_invalid_input() => "invalid",
        Err(_) => "error",
    };
    OPERATIONS.with_label_values(&[operation, outcome]).inc();
}

// =============================================================================
// HTTP Endpoint
// =============================================================================

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn render_metrics() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    let mut response = respond(StatusCode::OK, buffer);
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

async fn handle(
    req: Request<hyper::body::Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    Ok(match req.uri().path() {
        "/metrics" => render_metrics(),
        "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "ok"),
        _ => respond(StatusCode::NOT_FOUND, "not found"),
    })
}

/// Serve `/metrics` and `/healthz` until the process exits.
pub async fn serve(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle))
                .await
            {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_gathered() {
        FRAGMENTS_STORED.inc();
        record_operation::<()>("store", &Ok(()));

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("shardstore_fragments_stored_total"));
        assert!(text.contains("shardstore_operations_total"));
    }

    #[test]
    fn test_operation_outcomes() {
        let count = |outcome: &str| OPERATIONS.with_label_values(&["outcomes", outcome]).get();
        let (ok, invalid, error) = (count("ok"), count("invalid"), count("error"));

        record_operation::<()>("outcomes", &Ok(()));
        record_operation::<()>("outcomes", &Err(Error::InvalidParameter("tolerance".into())));
        record_operation::<()>(
            "outcomes",
            &Err(Error::NodeUnresponsive {
                node: 1,
                operation: "store".into(),
            }),
        );

        assert_eq!(count("ok"), ok + 1);
        assert_eq!(count("invalid"), invalid + 1);
        assert_eq!(count("error"), error + 1);
    }

    #[test]
    fn test_render_metrics_ok() {
        BYTES_STORED.inc_by(3);
        let response = render_metrics();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CONTENT_TYPE));
    }
}
