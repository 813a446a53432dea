//! Entity persistence on top of a hierarchical key-value store.
//!
//! The registry never keeps an authoritative copy of anything: every read goes
//! back to the store. [`Store`] owns the key layout
//! (`<prefix>/{nodes,instances,services}/<id>`), JSON encoding, the per-call
//! timeout and the translation of a missing key into [`StoreError::NotFound`].
//! Backends only implement raw string get/set/list through [`KvStore`].

mod etcd;
mod memory;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use crate::metrics::{self, Timer};
use crate::model::{Instance, Node, Service};

/// Default key prefix under which all entities live.
pub const DEFAULT_PREFIX: &str = "/akins.org/onedari";

/// Default bound on a single store operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist (or has expired).
    #[error("key not found: {0}")]
    NotFound(String),

    /// The operation did not complete within the configured bound.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Could not reach the store.
    #[error("store transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store answered with an error.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored document could not be encoded or decoded.
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this error means the key is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Raw key-value operations a backend must provide.
///
/// Implementations must give read-after-write consistency. `get` reports a
/// missing key as `Ok(None)`; any other failure is an error.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Read one key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write one key, expiring it after `ttl` when given.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Recursively read every key under `prefix`, in store order.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;
}

/// An entity persisted under its own directory, keyed by id.
///
/// The id is not stored in the document; it is recovered from the key.
pub trait Entity: Serialize + DeserializeOwned {
    /// Directory name below the prefix.
    const DIR: &'static str;

    /// Entity id.
    fn id(&self) -> &str;

    /// Overwrite the id, used when reading back from a key.
    fn set_id(&mut self, id: String);
}

impl Entity for Node {
    const DIR: &'static str = "nodes";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Entity for Instance {
    const DIR: &'static str = "instances";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Entity for Service {
    const DIR: &'static str = "services";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// Store adapter shared by all registry handlers.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn KvStore>,
    prefix: String,
    timeout: Duration,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Store {
    /// Wrap a backend with a key prefix and per-operation timeout.
    pub fn new(backend: Arc<dyn KvStore>, prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            timeout,
        }
    }

    /// Store over a fresh in-memory backend with default prefix and timeout.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), DEFAULT_PREFIX, DEFAULT_TIMEOUT)
    }

    /// Key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Absolute key for a key relative to the prefix.
    pub fn key(&self, relative: &str) -> String {
        format!(
            "{}/{}",
            self.prefix.trim_end_matches('/'),
            relative.trim_matches('/')
        )
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timer = Timer::start();
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };
        let outcome = match &result {
            Ok(_) => "ok",
            Err(StoreError::NotFound(_)) => "not_found",
            Err(_) => "error",
        };
        metrics::record_store_op(op, outcome, timer.elapsed());
        result
    }

    /// Serialize `value` and write it under `prefix/key`.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_string(value)?;
        let key = self.key(key);
        trace!(%key, ?ttl, "store set");
        self.bounded("set", self.backend.set(&key, data, ttl)).await
    }

    /// Read `prefix/key` and decode it.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let key = self.key(key);
        trace!(%key, "store get");
        let raw = self
            .bounded("get", async {
                self.backend
                    .get(&key)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(key.clone()))
            })
            .await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Recursive read of the directory `prefix/key`.
    ///
    /// Returns `(child key, raw value)` pairs, child keys relative to the
    /// directory. No ordering is guaranteed.
    pub async fn list(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let dir = format!("{}/", self.key(key));
        trace!(%dir, "store list");
        let entries = self.bounded("list", self.backend.list(&dir)).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&dir)
                    .filter(|child| !child.is_empty())
                    .map(|child| (child.to_string(), v))
            })
            .collect())
    }

    /// Persist an entity under its directory, without its id field.
    pub async fn put<E: Entity>(&self, entity: &E, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut doc = serde_json::to_value(entity)?;
        if let Some(fields) = doc.as_object_mut() {
            fields.remove("id");
        }
        debug!(dir = E::DIR, id = entity.id(), ?ttl, "saving entity");
        self.set(&format!("{}/{}", E::DIR, entity.id()), &doc, ttl)
            .await
    }

    /// Fetch one entity; its id is taken from the key.
    pub async fn fetch<E: Entity>(&self, id: &str) -> Result<E, StoreError> {
        let mut entity: E = self.get(&format!("{}/{}", E::DIR, id)).await?;
        entity.set_id(id.to_string());
        Ok(entity)
    }

    /// Fetch every entity of a kind. A single undecodable document fails the scan.
    pub async fn scan<E: Entity>(&self) -> Result<Vec<E>, StoreError> {
        let entries = self.list(E::DIR).await?;
        let mut entities = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            let mut entity: E = serde_json::from_str(&raw)?;
            let id = key.rsplit('/').next().unwrap_or(&key).to_string();
            entity.set_id(id);
            entities.push(entity);
        }
        Ok(entities)
    }
}
