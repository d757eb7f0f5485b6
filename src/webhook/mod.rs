//! Webhook boundary.
//!
//! The log-notification provider delivers batches of raw logs over POST.
//! Two envelope shapes exist in the wild: a nested block-notification
//! (`event.data.block.logs[]`) and a flat one (`logs[]` at the top level).
//! The shape is detected structurally; anything else is acknowledged with
//! 200 and dropped, because the provider retries on error statuses and an
//! envelope we cannot read will never become readable.

pub mod backfill;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::projector::{EventContext, Projector};
use crate::chain::{dispatch_batch, RawLog};

#[derive(Clone)]
pub struct WebhookState {
    pub projector: Arc<Projector>,
}

/// Build the Axum router. POST /webhook is the only ingestion route; axum
/// answers 405 for other methods on it.
pub fn build_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Start the webhook listener.
pub async fn serve(state: WebhookState, bind_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "webhook listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn handle_webhook(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    let Ok(envelope) = serde_json::from_slice::<Value>(&body) else {
        warn!("non-json webhook body rejected");
        return StatusCode::BAD_REQUEST;
    };
    let Some(logs) = extract_logs(&envelope) else {
        debug!("unrecognized webhook envelope, acknowledged without processing");
        return StatusCode::OK;
    };

    let (projected, failed) =
        dispatch_batch(&state.projector, &logs, &EventContext::default()).await;
    info!(received = logs.len(), projected, failed, "webhook delivery processed");
    // Per-event failures are a logging concern; an error status would only
    // trigger a redelivery of the same payload.
    StatusCode::OK
}

/// Structural envelope detection. Returns `None` for shapes we do not know.
fn extract_logs(envelope: &Value) -> Option<Vec<RawLog>> {
    let logs = envelope
        .pointer("/event/data/block/logs")
        .or_else(|| envelope.get("logs"))?;
    serde_json::from_value(logs.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_log() -> Value {
        json!({
            "topics": ["0xaaaa", "0xbbbb"],
            "data": "0x00",
            "transactionHash": "0xcafe"
        })
    }

    #[test]
    fn detects_nested_block_notification_envelope() {
        let envelope = json!({
            "webhookId": "wh_1",
            "event": {"data": {"block": {"number": 123, "logs": [sample_log()]}}}
        });
        let logs = extract_logs(&envelope).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].transaction_hash.as_deref(), Some("0xcafe"));
    }

    #[test]
    fn detects_flat_envelope() {
        let envelope = json!({"logs": [sample_log(), sample_log()]});
        assert_eq!(extract_logs(&envelope).unwrap().len(), 2);
    }

    #[test]
    fn unknown_envelope_is_none() {
        assert!(extract_logs(&json!({"hello": "world"})).is_none());
        assert!(extract_logs(&json!({"event": {"data": {}}})).is_none());
    }

    #[tokio::test]
    async fn webhook_routes_respond() {
        use crate::store::MemoryStore;
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let state = WebhookState {
            projector: Arc::new(Projector::new(Arc::new(MemoryStore::new()))),
        };
        let app = build_router(state);

        let ok = app
            .clone()
            .oneshot(
                Request::post("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"unknown": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let bad = app
            .clone()
            .oneshot(Request::post("/webhook").body(Body::from("not json")).unwrap())
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let method_not_allowed = app
            .oneshot(Request::get("/webhook").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(method_not_allowed.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
