//! HTTP callback receiver.
//!
//! Nodes under test are configured to POST their callbacks to
//! `{callback_base_url}/callback/{node_id}`. The receiver decodes each body
//! into a [`CallbackEnvelope`] and publishes it on the hub.
//!
//! Every accepted body is acknowledged with `204 No Content`, including
//! bodies that cannot be decoded: a node that sees a non-2xx answer retries,
//! which would only duplicate noise. Undecodable bodies are logged and, when
//! they are at least a JSON object, still published as
//! [`Callback::Other`](crate::envelope::Callback::Other) so they show up in
//! the unmatched log. Bodies over the size limit get `413`.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use ndid_core::NodeId;

use crate::channel::CallbackHub;
use crate::envelope::CallbackEnvelope;

/// Default request body limit.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Build the receiver router.
pub fn router(hub: CallbackHub, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/callback/:node_id", post(ingest))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn ingest(
    State(hub): State<CallbackHub>,
    Path(channel): Path<String>,
    body: Bytes,
) -> StatusCode {
    let channel = match NodeId::new(channel.as_str()) {
        Ok(node_id) => node_id,
        Err(e) => {
            tracing::warn!(channel = %channel, error = %e, "callback on invalid channel dropped");
            return StatusCode::NO_CONTENT;
        }
    };

    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(channel = %channel, error = %e, bytes = body.len(), "callback body is not JSON");
            return StatusCode::NO_CONTENT;
        }
    };

    match CallbackEnvelope::from_json_on(&channel, value) {
        Ok(envelope) => {
            if let crate::envelope::Callback::Other(opaque) = &envelope.callback {
                if let Some(reason) = &opaque.decode_error {
                    tracing::warn!(
                        node = %envelope.node_id,
                        kind = envelope.kind_label(),
                        %reason,
                        "callback of known type failed to decode"
                    );
                }
            }
            tracing::debug!(node = %envelope.node_id, kind = envelope.kind_label(), "callback received");
            hub.publish(&envelope);
        }
        Err(e) => {
            tracing::warn!(channel = %channel, error = %e, "callback envelope rejected");
        }
    }
    StatusCode::NO_CONTENT
}

/// A receiver running on a background task. Shuts down on drop.
#[derive(Debug)]
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ReceiverHandle {
    /// Address the receiver actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://{addr}` base for building callback URLs in tests.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) -> std::io::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?,
            None => Ok(()),
        }
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Bind `addr` and serve the receiver on a background task.
pub async fn spawn(
    hub: CallbackHub,
    addr: SocketAddr,
    body_limit: usize,
) -> std::io::Result<ReceiverHandle> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let app = router(hub, body_limit);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tracing::info!(%local_addr, "callback receiver listening");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });
    Ok(ReceiverHandle {
        local_addr,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}
