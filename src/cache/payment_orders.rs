use crate::errors::ServiceError;
use crate::models::PendingPaymentOrder;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

const SCAN_BATCH: usize = 100;

/// Store of payments awaiting a gateway callback, keyed by merchant order reference.
#[async_trait]
pub trait PaymentOrderCache: Send + Sync {
    async fn save(&self, order: &PendingPaymentOrder) -> Result<(), ServiceError>;

    /// `Ok(None)` on a miss; a stored entry that cannot be decoded is a `CacheError`.
    async fn get(&self, id: &str) -> Result<Option<PendingPaymentOrder>, ServiceError>;

    /// Every readable entry whose id starts with `prefix`, ordered by id.
    /// Undecodable entries are logged and skipped.
    async fn list_by_id_prefix(&self, prefix: &str)
        -> Result<Vec<PendingPaymentOrder>, ServiceError>;

    async fn remove(&self, id: &str) -> Result<(), ServiceError>;
}

fn decode(id: &str, raw: &[u8]) -> Result<PendingPaymentOrder, ServiceError> {
    serde_json::from_slice(raw).map_err(|e| {
        ServiceError::CacheError(format!("corrupt pending payment entry {}: {}", id, e))
    })
}

/// Decodes a scan batch, dropping entries that do not parse.
fn decode_all<I, B>(entries: I) -> Vec<PendingPaymentOrder>
where
    I: IntoIterator<Item = (String, B)>,
    B: AsRef<[u8]>,
{
    let mut out: Vec<PendingPaymentOrder> = entries
        .into_iter()
        .filter_map(|(id, raw)| match decode(&id, raw.as_ref()) {
            Ok(order) => Some(order),
            Err(e) => {
                warn!(id = %id, error = %e, "skipping unreadable pending payment");
                None
            }
        })
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

/// Sorts one `GET` reply from a prefix scan. Connection failures abort the scan;
/// anything wrong with the key itself, such as a non-string value, only drops that key.
fn scanned_value(
    key: &str,
    reply: redis::RedisResult<Option<Vec<u8>>>,
) -> Result<Option<Vec<u8>>, ServiceError> {
    match reply {
        Ok(raw) => Ok(raw),
        Err(e)
            if e.kind() == redis::ErrorKind::IoError
                || e.is_connection_dropped()
                || e.is_connection_refusal() =>
        {
            Err(e.into())
        }
        Err(e) => {
            warn!(key = %key, error = %e, "skipping unreadable pending payment key");
            Ok(None)
        }
    }
}

/// Redis backend. Entries are JSON strings under `{namespace}:{id}` with an optional TTL.
#[derive(Clone)]
pub struct RedisPaymentOrderCache {
    client: Arc<redis::Client>,
    namespace: String,
    ttl: Option<Duration>,
}

impl RedisPaymentOrderCache {
    pub fn new(
        redis_url: &str,
        namespace: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Result<Self, ServiceError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
            namespace: namespace.into(),
            ttl,
        })
    }

    /// Fails fast when Redis is unreachable.
    pub async fn ping(&self) -> Result<(), ServiceError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.namespace, id)
    }

    fn id_from_key<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.namespace)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }
}

#[async_trait]
impl PaymentOrderCache for RedisPaymentOrderCache {
    #[instrument(skip(self, order), fields(id = %order.id))]
    async fn save(&self, order: &PendingPaymentOrder) -> Result<(), ServiceError> {
        let payload = serde_json::to_string(order)?;
        let mut conn = self.client.get_async_connection().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(&order.id)).arg(payload);
        if let Some(ttl) = self.ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await?;

        debug!("stored pending payment with TTL {:?}", self.ttl);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<PendingPaymentOrder>, ServiceError> {
        let mut conn = self.client.get_async_connection().await?;
        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await?;
        raw.map(|raw| decode(id, &raw)).transpose()
    }

    #[instrument(skip(self))]
    async fn list_by_id_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<PendingPaymentOrder>, ServiceError> {
        let mut conn = self.client.get_async_connection().await?;
        let pattern = format!("{}*", escape_glob(&self.key(prefix)));

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            // Entries can expire between SCAN and GET.
            let reply = redis::cmd("GET").arg(&key).query_async(&mut conn).await;
            if let Some(raw) = scanned_value(&key, reply)? {
                entries.push((self.id_from_key(&key).to_string(), raw));
            }
        }
        Ok(decode_all(entries))
    }

    #[instrument(skip(self))]
    async fn remove(&self, id: &str) -> Result<(), ServiceError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// Escapes Redis glob metacharacters so ids are matched literally.
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone)]
struct CacheEntry {
    raw: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| Instant::now() >= expires_at)
            .unwrap_or(false)
    }
}

/// In-process backend used when Redis is not configured, and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentOrderCache {
    store: Arc<RwLock<BTreeMap<String, CacheEntry>>>,
    ttl: Option<Duration>,
}

impl InMemoryPaymentOrderCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            store: Arc::new(RwLock::new(BTreeMap::new())),
            ttl,
        }
    }

    /// Stores an arbitrary payload under `id`, bypassing serialization.
    pub async fn insert_raw(&self, id: &str, raw: &str) {
        let entry = CacheEntry {
            raw: raw.to_string(),
            expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
        };
        self.store.write().await.insert(id.to_string(), entry);
    }

    pub async fn len(&self) -> usize {
        self.store
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PaymentOrderCache for InMemoryPaymentOrderCache {
    async fn save(&self, order: &PendingPaymentOrder) -> Result<(), ServiceError> {
        let raw = serde_json::to_string(order)?;
        self.insert_raw(&order.id, &raw).await;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PendingPaymentOrder>, ServiceError> {
        let mut store = self.store.write().await;
        match store.get(id) {
            Some(entry) if entry.is_expired() => {
                store.remove(id);
                Ok(None)
            }
            Some(entry) => decode(id, entry.raw.as_bytes()).map(Some),
            None => Ok(None),
        }
    }

    async fn list_by_id_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<PendingPaymentOrder>, ServiceError> {
        let mut store = self.store.write().await;
        store.retain(|_, entry| !entry.is_expired());
        let matches: Vec<(String, String)> = store
            .range(prefix.to_string()..)
            .take_while(|(id, _)| id.starts_with(prefix))
            .map(|(id, entry)| (id.clone(), entry.raw.clone()))
            .collect();
        Ok(decode_all(matches))
    }

    async fn remove(&self, id: &str) -> Result<(), ServiceError> {
        self.store.write().await.remove(id);
        Ok(())
    }
}
