use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::caching::{Tier, TierError, Ttl};

/// Plain CRUD access to records of bytes, keyed by an opaque storage id.
///
/// A [`StoreTier`] turns any store into a [`Tier`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Writes a record, replacing an existing one.
    async fn create(&self, id: &str, data: Vec<u8>) -> Result<(), TierError>;

    /// Reads a record, `None` if it does not exist.
    async fn read(&self, id: &str) -> Result<Option<Vec<u8>>, TierError>;

    /// Replaces an existing record, returning `false` if there was none.
    async fn update(&self, id: &str, data: Vec<u8>) -> Result<bool, TierError>;

    /// Deletes a record, returning `false` if there was none.
    async fn delete(&self, id: &str) -> Result<bool, TierError>;

    /// Deletes all records, returning how many there were.
    async fn clear(&self) -> Result<usize, TierError>;
}

/// A [`Store`] backed by a map in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create(&self, id: &str, data: Vec<u8>) -> Result<(), TierError> {
        self.records.lock().unwrap().insert(id.to_owned(), data);
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Option<Vec<u8>>, TierError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn update(&self, id: &str, data: Vec<u8>) -> Result<bool, TierError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(id) {
            Some(record) => {
                *record = data;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, TierError> {
        Ok(self.records.lock().unwrap().remove(id).is_some())
    }

    async fn clear(&self) -> Result<usize, TierError> {
        let mut records = self.records.lock().unwrap();
        let count = records.len();
        records.clear();
        Ok(count)
    }
}

/// Converts values to and from the bytes a [`Store`] holds.
pub trait Codec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Vec<u8>, TierError>;

    fn decode(&self, bytes: &[u8]) -> Result<V, TierError>;
}

/// Encodes values as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<V> Codec<V> for JsonCodec
where
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, TierError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, TierError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Maps cache keys to storage ids.
pub type KeyHasher = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// The default [`KeyHasher`]: the hex-formatted SHA-256 hash of the key.
pub fn sha256_hex(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// The expiry header of records that never expire.
const NEVER: u64 = u64::MAX;

/// Every record starts with its expiry: milliseconds since the UNIX epoch as a big-endian `u64`.
const HEADER_LEN: usize = 8;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| since.as_millis() as u64)
}

fn expires_at(ttl: Ttl) -> u64 {
    match ttl.as_duration() {
        Some(ttl) => now_millis().saturating_add(ttl.as_millis() as u64),
        None => NEVER,
    }
}

fn encode_record(expires_at: u64, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
    record.extend_from_slice(&expires_at.to_be_bytes());
    record.extend_from_slice(payload);
    record
}

fn decode_header(record: &[u8]) -> Result<u64, TierError> {
    if record.len() < HEADER_LEN {
        return Err(TierError::Corrupted(format!(
            "record of {} bytes is missing its expiry header",
            record.len()
        )));
    }
    let mut header = [0; HEADER_LEN];
    header.copy_from_slice(&record[..HEADER_LEN]);
    Ok(u64::from_be_bytes(header))
}

/// A record that has not expired yet.
struct LiveRecord {
    expires_at: u64,
    bytes: Vec<u8>,
}

impl LiveRecord {
    fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    fn ttl(&self) -> Ttl {
        match self.expires_at {
            NEVER => Ttl::Unbounded,
            expires_at => {
                Ttl::Finite(Duration::from_millis(expires_at.saturating_sub(now_millis())))
            }
        }
    }
}

/// Adapts a [`Store`] to the [`Tier`] contract.
///
/// Records carry their own expiry and are evicted once they are read after it passed. Keys are
/// mapped to storage ids with a [`KeyHasher`] and values are encoded with a [`Codec`], by default
/// [`sha256_hex`] and [`JsonCodec`].
///
/// A rejection safe store tier logs failures of its store and reports them as a miss, or as a
/// write that did nothing.
pub struct StoreTier<S, V, C = JsonCodec> {
    store: S,
    codec: C,
    hasher: KeyHasher,
    default_ttl: Option<Duration>,
    shared: bool,
    rejection_safe: bool,
    _value: PhantomData<fn() -> V>,
}

impl<S: fmt::Debug, V, C> fmt::Debug for StoreTier<S, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreTier")
            .field("store", &self.store)
            .field("default_ttl", &self.default_ttl)
            .field("shared", &self.shared)
            .field("rejection_safe", &self.rejection_safe)
            .finish()
    }
}

impl<S, V> StoreTier<S, V, JsonCodec>
where
    S: Store,
{
    /// Creates a private tier over `store`, that is not rejection safe.
    pub fn new(store: S, default_ttl: Option<Duration>) -> Self {
        Self {
            store,
            codec: JsonCodec,
            hasher: Arc::new(sha256_hex),
            default_ttl,
            shared: false,
            rejection_safe: false,
            _value: PhantomData,
        }
    }
}

impl<S, V, C> StoreTier<S, V, C>
where
    S: Store,
    C: Codec<V>,
{
    pub fn with_codec<C2: Codec<V>>(self, codec: C2) -> StoreTier<S, V, C2> {
        StoreTier {
            store: self.store,
            codec,
            hasher: self.hasher,
            default_ttl: self.default_ttl,
            shared: self.shared,
            rejection_safe: self.rejection_safe,
            _value: PhantomData,
        }
    }

    pub fn with_hasher<H>(mut self, hasher: H) -> Self
    where
        H: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.hasher = Arc::new(hasher);
        self
    }

    /// Marks the tier as visible to other processes.
    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn with_rejection_safe(mut self, rejection_safe: bool) -> Self {
        self.rejection_safe = rejection_safe;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn id(&self, key: &str) -> String {
        (self.hasher)(key)
    }

    /// Swallows store failures if this tier is rejection safe.
    fn guard<T: Default>(
        &self,
        operation: &'static str,
        result: Result<T, TierError>,
    ) -> Result<T, TierError> {
        match result {
            Err(err) if self.rejection_safe => {
                tracing::error!(
                    operation,
                    error = &err as &dyn std::error::Error,
                    "Store tier failed"
                );
                Ok(T::default())
            }
            result => result,
        }
    }

    /// Reads the record for `id`, evicting it if it expired.
    async fn read_live(&self, id: &str) -> Result<Option<LiveRecord>, TierError> {
        let Some(bytes) = self.store.read(id).await? else {
            return Ok(None);
        };

        let expires_at = match decode_header(&bytes) {
            Ok(expires_at) => expires_at,
            Err(err) => {
                self.store.delete(id).await?;
                return Err(err);
            }
        };
        if expires_at != NEVER && expires_at <= now_millis() {
            tracing::trace!(id, "Evicting expired record");
            self.store.delete(id).await?;
            return Ok(None);
        }

        Ok(Some(LiveRecord { expires_at, bytes }))
    }

    async fn try_get(&self, key: &str) -> Result<Option<V>, TierError> {
        let id = self.id(key);
        let Some(record) = self.read_live(&id).await? else {
            return Ok(None);
        };
        match self.codec.decode(record.payload()) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::debug!(id, "Deleting record that failed to decode");
                self.store.delete(&id).await?;
                Err(err)
            }
        }
    }

    async fn try_set(&self, key: &str, value: &V, ttl: Option<Duration>) -> Result<(), TierError> {
        let ttl = ttl.map_or_else(|| Ttl::from_option(self.default_ttl), Ttl::Finite);
        let payload = self.codec.encode(value)?;
        let record = encode_record(expires_at(ttl), &payload);
        self.store.create(&self.id(key), record).await
    }

    async fn try_entry_ttl(&self, key: &str) -> Result<Option<Ttl>, TierError> {
        let record = self.read_live(&self.id(key)).await?;
        Ok(record.map(|record| record.ttl()))
    }

    async fn try_update_ttl(&self, key: &str, ttl: Ttl) -> Result<(), TierError> {
        let id = self.id(key);
        if let Some(record) = self.read_live(&id).await? {
            let updated = encode_record(expires_at(ttl), record.payload());
            self.store.update(&id, updated).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S, V, C> Tier<V> for StoreTier<S, V, C>
where
    S: Store,
    V: Send + Sync + 'static,
    C: Codec<V>,
{
    async fn get(&self, key: &str) -> Result<Option<V>, TierError> {
        let result = self.try_get(key).await;
        self.guard("get", result)
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), TierError> {
        let result = self.try_set(key, &value, ttl).await;
        self.guard("set", result)
    }

    async fn del(&self, key: &str) -> Result<bool, TierError> {
        let result = self.store.delete(&self.id(key)).await;
        self.guard("del", result)
    }

    async fn clear(&self) -> Result<usize, TierError> {
        let result = self.store.clear().await;
        self.guard("clear", result)
    }

    async fn entry_ttl(&self, key: &str) -> Result<Option<Ttl>, TierError> {
        let result = self.try_entry_ttl(key).await;
        self.guard("entry_ttl", result)
    }

    async fn update_ttl(&self, key: &str, ttl: Ttl) -> Result<(), TierError> {
        let result = self.try_update_ttl(key, ttl).await;
        self.guard("update_ttl", result)
    }

    fn default_ttl(&self) -> Ttl {
        Ttl::from_option(self.default_ttl)
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn rejection_safe(&self) -> bool {
        self.rejection_safe
    }
}

#[cfg(test)]
mod tests {
    use crate::test;

    use super::*;

    type TestTier = StoreTier<MemoryStore, String>;

    fn tier(default_ttl: Option<Duration>) -> TestTier {
        StoreTier::new(MemoryStore::new(), default_ttl)
    }

    #[test]
    fn test_sha256_hex() {
        insta::assert_snapshot!(sha256_hex("foo"), @"2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae");
    }

    #[tokio::test]
    async fn test_get_set_del() {
        test::setup();
        let tier = tier(Some(Duration::from_secs(60)));

        assert_eq!(tier.get("foo").await.unwrap(), None);
        tier.set("foo", "bar".into(), None).await.unwrap();
        assert_eq!(tier.get("foo").await.unwrap().as_deref(), Some("bar"));
        assert!(tier.store().read(&sha256_hex("foo")).await.unwrap().is_some());

        let ttl = tier.entry_ttl("foo").await.unwrap().unwrap();
        assert!(ttl <= Ttl::Finite(Duration::from_secs(60)));
        assert!(ttl > Ttl::Finite(Duration::from_secs(59)));

        assert!(tier.del("foo").await.unwrap());
        assert!(!tier.del("foo").await.unwrap());
        assert!(tier.store().is_empty());
    }

    #[tokio::test]
    async fn test_evicts_on_read() {
        test::setup();
        let tier = tier(None);

        tier.set("foo", "bar".into(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tier.set("forever", "bar".into(), None).await.unwrap();
        assert_eq!(tier.entry_ttl("forever").await.unwrap(), Some(Ttl::Unbounded));

        test::sleep_ms(50).await;
        assert_eq!(tier.store().len(), 2);
        assert_eq!(tier.get("foo").await.unwrap(), None);
        assert_eq!(tier.store().len(), 1);
        assert_eq!(tier.get("forever").await.unwrap().as_deref(), Some("bar"));
    }

    #[tokio::test]
    async fn test_update_ttl() {
        test::setup();
        let tier = tier(Some(Duration::from_millis(20)));

        tier.set("foo", "bar".into(), None).await.unwrap();
        tier.update_ttl("foo", Ttl::Finite(Duration::from_secs(60)))
            .await
            .unwrap();
        tier.update_ttl("missing", Ttl::Unbounded).await.unwrap();

        test::sleep_ms(50).await;
        assert_eq!(tier.get("foo").await.unwrap().as_deref(), Some("bar"));
        assert_eq!(tier.get("missing").await.unwrap(), None);
        assert_eq!(tier.store().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_records() {
        test::setup();
        let tier = tier(None);
        tier.store()
            .create(&sha256_hex("foo"), vec![1, 2, 3])
            .await
            .unwrap();

        let err = tier.get("foo").await.unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"corrupted record: record of 3 bytes is missing its expiry header");
        // the broken record is gone
        assert_eq!(tier.get("foo").await.unwrap(), None);

        // an intact header with a payload that does not decode
        let record = encode_record(NEVER, b"not json");
        tier.store().create(&sha256_hex("foo"), record).await.unwrap();
        let err = tier.get("foo").await.unwrap_err();
        assert!(matches!(err, TierError::Codec(_)));
        assert_eq!(tier.store().len(), 0);
        assert_eq!(tier.get("foo").await.unwrap(), None);

        let tier = tier.with_rejection_safe(true);
        let record = encode_record(NEVER, b"not json");
        tier.store().create(&sha256_hex("foo"), record).await.unwrap();
        assert_eq!(tier.get("foo").await.unwrap(), None);
        assert_eq!(tier.store().len(), 0);
    }

    #[tokio::test]
    async fn test_custom_hasher_and_codec() {
        struct Utf8Codec;

        impl Codec<String> for Utf8Codec {
            fn encode(&self, value: &String) -> Result<Vec<u8>, TierError> {
                Ok(value.as_bytes().to_vec())
            }

            fn decode(&self, bytes: &[u8]) -> Result<String, TierError> {
                String::from_utf8(bytes.to_vec()).map_err(|err| TierError::Codec(err.to_string()))
            }
        }

        let tier = tier(None)
            .with_hasher(|key| format!("key:{key}"))
            .with_codec(Utf8Codec)
            .with_shared(true);
        assert!(tier.is_shared());
        assert!(!tier.rejection_safe());

        tier.set("foo", "bar".into(), None).await.unwrap();
        let record = tier.store().read("key:foo").await.unwrap().unwrap();
        assert_eq!(&record[HEADER_LEN..], b"bar");
        assert_eq!(decode_header(&record).unwrap(), NEVER);
        assert_eq!(tier.get("foo").await.unwrap().as_deref(), Some("bar"));

        assert_eq!(Tier::clear(&tier).await.unwrap(), 1);
    }
}
