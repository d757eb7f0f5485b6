//! Keyed document store behind the `DocumentStore` trait.
//!
//! Documents are JSON strings addressed by `(collection, key)`. The Valkey
//! implementation namespaces everything under a configurable prefix so
//! multiple instances (e.g. staging vs live) can share one server:
//!   {prefix}:contests:{id}            → JSON Contest
//!   {prefix}:speculations:{id}        → JSON Speculation
//!   {prefix}:positions:{composite}    → JSON Position
//!   ...
//!
//! Two write primitives matter for idempotency:
//! - `create` is conditional (SET NX): create-if-absent with no race window
//!   between an existence check and the write;
//! - `cas` compares the stored raw value before swapping, which gives the
//!   read-modify-write loop in `update_doc` transactional semantics per
//!   document.

use anyhow::{bail, Context};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

/// One operation in a batched commit.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        collection: String,
        key: String,
        json: String,
    },
    Delete {
        collection: String,
        key: String,
    },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<String>>;

    async fn put(&self, collection: &str, key: &str, json: &str) -> anyhow::Result<()>;

    /// Create-if-absent. Returns false (and writes nothing) when the
    /// document already exists.
    async fn create(&self, collection: &str, key: &str, json: &str) -> anyhow::Result<bool>;

    /// Compare-and-swap on the raw stored value. `expected = None` means
    /// "must not exist". Returns false when the comparison failed.
    async fn cas(
        &self,
        collection: &str,
        key: &str,
        expected: Option<&str>,
        json: &str,
    ) -> anyhow::Result<bool>;

    async fn delete(&self, collection: &str, key: &str) -> anyhow::Result<()>;

    /// Keys in a collection whose id starts with `key_prefix` (empty prefix
    /// lists the whole collection). Returns document ids, not full store
    /// keys.
    async fn list_keys(&self, collection: &str, key_prefix: &str) -> anyhow::Result<Vec<String>>;

    /// Apply a batch of puts/deletes as one commit.
    async fn commit(&self, ops: Vec<BatchOp>) -> anyhow::Result<()>;
}

/// How many CAS attempts `update_doc` makes before giving up. Contention on
/// a single document is rare (one leaderboard, two racing deliveries), so a
/// small bound is plenty.
const CAS_RETRIES: usize = 8;

pub async fn get_doc<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
) -> anyhow::Result<Option<T>> {
    match store.get(collection, key).await? {
        Some(json) => {
            let doc = serde_json::from_str(&json)
                .with_context(|| format!("corrupt document {collection}:{key}"))?;
            Ok(Some(doc))
        }
        None => Ok(None),
    }
}

pub async fn put_doc<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
    doc: &T,
) -> anyhow::Result<()> {
    store.put(collection, key, &serde_json::to_string(doc)?).await
}

/// Conditional create. Returns false when the document already existed.
pub async fn create_doc<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
    doc: &T,
) -> anyhow::Result<bool> {
    store.create(collection, key, &serde_json::to_string(doc)?).await
}

/// Read-modify-write with optimistic concurrency. Returns `Ok(None)` when
/// the document does not exist (the caller decides whether that is an
/// error), otherwise the updated document.
pub async fn update_doc<T, F>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
    mut apply: F,
) -> anyhow::Result<Option<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(&mut T),
{
    for attempt in 0..CAS_RETRIES {
        let raw = match store.get(collection, key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let mut doc: T = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt document {collection}:{key}"))?;
        apply(&mut doc);
        let next = serde_json::to_string(&doc)?;
        if store.cas(collection, key, Some(&raw), &next).await? {
            return Ok(Some(doc));
        }
        debug!(collection, key, attempt, "cas conflict, retrying update");
    }
    bail!("update of {collection}:{key} lost {CAS_RETRIES} cas races");
}

// ---------------------------------------------------------------------------
// Valkey implementation
// ---------------------------------------------------------------------------

const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if (cur == false and ARGV[1] == '') or cur == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

#[derive(Clone)]
pub struct ValkeyStore {
    conn: MultiplexedConnection,
    prefix: String,
    cas_script: redis::Script,
}

impl ValkeyStore {
    pub async fn connect(url: &str, prefix: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url, prefix, "connected to Valkey");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            cas_script: redis::Script::new(CAS_SCRIPT),
        })
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(response = %pong, "Valkey ping");
        Ok(())
    }

    fn key(&self, collection: &str, key: &str) -> String {
        format!("{}:{collection}:{key}", self.prefix)
    }
}

#[async_trait]
impl DocumentStore for ValkeyStore {
    async fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(self.key(collection, key)).await?;
        Ok(json)
    }

    async fn put(&self, collection: &str, key: &str, json: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.key(collection, key), json).await?;
        Ok(())
    }

    async fn create(&self, collection: &str, key: &str, json: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let created: bool = conn.set_nx(self.key(collection, key), json).await?;
        Ok(created)
    }

    async fn cas(
        &self,
        collection: &str,
        key: &str,
        expected: Option<&str>,
        json: &str,
    ) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let swapped: i32 = self
            .cas_script
            .key(self.key(collection, key))
            .arg(expected.unwrap_or(""))
            .arg(json)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn delete(&self, collection: &str, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(collection, key)).await?;
        Ok(())
    }

    async fn list_keys(&self, collection: &str, key_prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:{collection}:{key_prefix}*", self.prefix);
        let full: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await?;
        let strip = format!("{}:{collection}:", self.prefix);
        Ok(full
            .into_iter()
            .filter_map(|k| k.strip_prefix(&strip).map(str::to_string))
            .collect())
    }

    async fn commit(&self, ops: Vec<BatchOp>) -> anyhow::Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        let count = ops.len();
        for op in ops {
            match op {
                BatchOp::Put { collection, key, json } => {
                    pipe.set(self.key(&collection, &key), json).ignore();
                }
                BatchOp::Delete { collection, key } => {
                    pipe.del(self.key(&collection, &key)).ignore();
                }
            }
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        debug!(ops = count, "batch committed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, paper mode)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    docs: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(collection: &str, key: &str) -> String {
        format!("{collection}:{key}")
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.docs.get(&Self::key(collection, key)).map(|v| v.clone()))
    }

    async fn put(&self, collection: &str, key: &str, json: &str) -> anyhow::Result<()> {
        self.docs.insert(Self::key(collection, key), json.to_string());
        Ok(())
    }

    async fn create(&self, collection: &str, key: &str, json: &str) -> anyhow::Result<bool> {
        match self.docs.entry(Self::key(collection, key)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(json.to_string());
                Ok(true)
            }
        }
    }

    async fn cas(
        &self,
        collection: &str,
        key: &str,
        expected: Option<&str>,
        json: &str,
    ) -> anyhow::Result<bool> {
        match self.docs.entry(Self::key(collection, key)) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if expected == Some(slot.get().as_str()) {
                    slot.insert(json.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                if expected.is_none() {
                    slot.insert(json.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn delete(&self, collection: &str, key: &str) -> anyhow::Result<()> {
        self.docs.remove(&Self::key(collection, key));
        Ok(())
    }

    async fn list_keys(&self, collection: &str, key_prefix: &str) -> anyhow::Result<Vec<String>> {
        let strip = format!("{collection}:");
        let mut keys: Vec<String> = self
            .docs
            .iter()
            .filter_map(|entry| {
                entry
                    .key()
                    .strip_prefix(&strip)
                    .filter(|id| id.starts_with(key_prefix))
                    .map(str::to_string)
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn commit(&self, ops: Vec<BatchOp>) -> anyhow::Result<()> {
        for op in ops {
            match op {
                BatchOp::Put { collection, key, json } => {
                    self.docs.insert(Self::key(&collection, &key), json);
                }
                BatchOp::Delete { collection, key } => {
                    self.docs.remove(&Self::key(&collection, &key));
                }
            }
        }
        Ok(())
    }
}

/// Connect to the configured store, falling back to the in-memory store
/// when no URL is configured (paper mode) — a misconfigured URL is still an
/// error.
pub async fn connect(
    url: &str,
    prefix: &str,
) -> anyhow::Result<std::sync::Arc<dyn DocumentStore>> {
    if url.is_empty() {
        warn!("no store URL configured — using in-memory store, state will not survive restart");
        return Ok(std::sync::Arc::new(MemoryStore::new()));
    }
    let store = ValkeyStore::connect(url, prefix).await?;
    store.ping().await?;
    Ok(std::sync::Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u64,
    }

    #[tokio::test]
    async fn create_is_conditional() {
        let store = MemoryStore::new();
        assert!(store.create("c", "k", r#"{"n":1}"#).await.unwrap());
        assert!(!store.create("c", "k", r#"{"n":2}"#).await.unwrap());
        assert_eq!(store.get("c", "k").await.unwrap().as_deref(), Some(r#"{"n":1}"#));
    }

    #[tokio::test]
    async fn cas_rejects_stale_writes() {
        let store = MemoryStore::new();
        store.put("c", "k", "a").await.unwrap();
        assert!(!store.cas("c", "k", Some("b"), "c").await.unwrap());
        assert!(store.cas("c", "k", Some("a"), "b").await.unwrap());
        assert_eq!(store.get("c", "k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn update_doc_round_trips() {
        let store = MemoryStore::new();
        put_doc(&store, "c", "k", &Counter { n: 1 }).await.unwrap();
        let updated: Option<Counter> = update_doc(&store, "c", "k", |c: &mut Counter| c.n += 1)
            .await
            .unwrap();
        assert_eq!(updated, Some(Counter { n: 2 }));
        let missing: Option<Counter> =
            update_doc(&store, "c", "absent", |c: &mut Counter| c.n += 1)
                .await
                .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn list_keys_filters_by_prefix() {
        let store = MemoryStore::new();
        store.put("registrations", "9-alice", "{}").await.unwrap();
        store.put("registrations", "9-bob", "{}").await.unwrap();
        store.put("registrations", "10-carol", "{}").await.unwrap();
        let keys = store.list_keys("registrations", "9-").await.unwrap();
        assert_eq!(keys, vec!["9-alice".to_string(), "9-bob".to_string()]);
    }
}
