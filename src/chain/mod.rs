//! On-chain event ingestion: payload codec, event registry, and the
//! projection engine that turns decoded events into store mutations.

pub mod codec;
pub mod projector;
pub mod registry;

use alloy_primitives::B256;
use std::str::FromStr;
use tracing::{debug, error};

use crate::chain::projector::{EventContext, Projector};

/// A raw log as delivered by the webhook or the explorer API: topics as
/// `0x…` strings, data as `0x…` hex.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawLog {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "transactionHash")]
    pub transaction_hash: Option<String>,
}

/// Dispatch one raw log. Filters on topic0, looks topic1 up in the
/// registry, decodes and projects. Logs outside our interest return
/// `Ok(false)`; handler failures propagate so the caller can count them.
pub async fn dispatch_log(
    projector: &Projector,
    log: &RawLog,
    ctx: &EventContext,
) -> anyhow::Result<bool> {
    let [topic0, topic1, ..] = log.topics.as_slice() else {
        debug!("log without event-type topic, ignoring");
        return Ok(false);
    };
    let Ok(topic0) = B256::from_str(topic0) else {
        debug!(topic0, "unparseable topic0, ignoring");
        return Ok(false);
    };
    if topic0 != registry::PROTOCOL_EVENT_TOPIC {
        debug!(%topic0, "foreign log, ignoring");
        return Ok(false);
    }
    let Ok(event_type) = B256::from_str(topic1) else {
        debug!(topic1, "unparseable event-type topic, ignoring");
        return Ok(false);
    };
    let Some(spec) = registry::by_topic(&event_type) else {
        debug!(%event_type, "unregistered event type, ignoring");
        return Ok(false);
    };

    let data = codec::decode_hex(&log.data)?;
    let values = codec::decode_payload(spec.schema, &data)?;
    let ctx = EventContext {
        tx_hash: log.transaction_hash.clone(),
        ..ctx.clone()
    };
    projector.apply(spec, &values, &ctx).await?;
    Ok(true)
}

/// Run a batch of logs sequentially. A failing event is logged and does not
/// stop the rest of the delivery. Returns (projected, failed).
pub async fn dispatch_batch(
    projector: &Projector,
    logs: &[RawLog],
    ctx: &EventContext,
) -> (usize, usize) {
    let mut projected = 0;
    let mut failed = 0;
    for log in logs {
        match dispatch_log(projector, log, ctx).await {
            Ok(true) => projected += 1,
            Ok(false) => {}
            Err(err) => {
                failed += 1;
                error!(tx = ?log.transaction_hash, error = %err, "event projection failed");
            }
        }
    }
    (projected, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::codec::{encode, FieldValue};
    use crate::chain::registry::{by_name, PROTOCOL_EVENT_TOPIC};
    use crate::model::col;
    use crate::store::{DocumentStore, MemoryStore};
    use alloy_primitives::{Address, U256};
    use std::sync::Arc;

    fn raw_log(event: &str, values: &[FieldValue]) -> RawLog {
        let spec = by_name(event).unwrap();
        RawLog {
            topics: vec![
                format!("{PROTOCOL_EVENT_TOPIC:#x}"),
                format!("{:#x}", spec.topic),
            ],
            data: format!("0x{}", hex::encode(encode::payload(values))),
            transaction_hash: Some("0xabc".into()),
        }
    }

    #[tokio::test]
    async fn dispatches_registered_event() {
        let store = Arc::new(MemoryStore::new());
        let projector = Projector::new(store.clone());
        let log = raw_log(
            "ContestCreated",
            &[
                FieldValue::Uint256(U256::from(77u64)),
                FieldValue::Str("jo-77".into()),
                FieldValue::Address(Address::ZERO),
            ],
        );
        let projected = dispatch_log(&projector, &log, &EventContext::default())
            .await
            .unwrap();
        assert!(projected);
        assert!(store.get(col::CONTESTS, "77").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn foreign_topic0_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let projector = Projector::new(store.clone());
        let mut log = raw_log(
            "ContestCreated",
            &[
                FieldValue::Uint256(U256::from(77u64)),
                FieldValue::Str("jo-77".into()),
                FieldValue::Address(Address::ZERO),
            ],
        );
        log.topics[0] = format!("{:#x}", alloy_primitives::B256::repeat_byte(1));
        let projected = dispatch_log(&projector, &log, &EventContext::default())
            .await
            .unwrap();
        assert!(!projected);
        assert!(store.get(col::CONTESTS, "77").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_continues_past_a_bad_payload() {
        let store = Arc::new(MemoryStore::new());
        let projector = Projector::new(store.clone());
        let good = raw_log(
            "ContestCreated",
            &[
                FieldValue::Uint256(U256::from(77u64)),
                FieldValue::Str("jo-77".into()),
                FieldValue::Address(Address::ZERO),
            ],
        );
        let mut bad = good.clone();
        bad.data = "0x00".into();

        let (projected, failed) =
            dispatch_batch(&projector, &[bad, good], &EventContext::default()).await;
        assert_eq!((projected, failed), (1, 1));
        assert!(store.get(col::CONTESTS, "77").await.unwrap().is_some());
    }
}
