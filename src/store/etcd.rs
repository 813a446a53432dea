//! etcd v3 backend over the gRPC JSON gateway.
//!
//! Keys and values travel base64-encoded. Expiring writes grant a lease first
//! and attach it to the put, so expiry is enforced by etcd itself.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{KvStore, StoreError};

#[derive(Debug, Serialize)]
struct RangeRequest {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    range_end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Serialize)]
struct PutRequest {
    key: String,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {}

#[derive(Debug, Serialize)]
struct LeaseGrantRequest {
    #[serde(rename = "TTL")]
    ttl: i64,
}

#[derive(Debug, Deserialize)]
struct LeaseGrantResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// Smallest key strictly greater than every key starting with `prefix`.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // All 0xff: range to the end of the keyspace.
    vec![0]
}

fn decode(field: &str, encoded: &str) -> Result<String, StoreError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| StoreError::Backend(format!("invalid base64 in {field}: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| StoreError::Backend(format!("non UTF-8 {field}: {e}")))
}

/// etcd client speaking to one or more gateway endpoints.
#[derive(Debug, Clone)]
pub struct EtcdStore {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl EtcdStore {
    /// Create a client for the given endpoints (e.g. `http://127.0.0.1:2379`).
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Result<Self, StoreError> {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| e.trim().trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(StoreError::Backend("no etcd endpoints configured".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoints })
    }

    /// Endpoints in the order they are tried.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// POST to the first endpoint that answers. Transport failures fall
    /// through to the next endpoint; HTTP error statuses do not.
    async fn call<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, StoreError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut last_err = None;
        for endpoint in &self.endpoints {
            let url = format!("{endpoint}{path}");
            let response = match self.client.post(&url).json(body).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(%url, error = %e, "etcd endpoint unreachable");
                    last_err = Some(e);
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(StoreError::Backend(format!("{status}: {text}")));
            }
            return Ok(response.json().await?);
        }

        match last_err {
            Some(e) => Err(StoreError::Transport(e)),
            None => Err(StoreError::Backend("no etcd endpoints configured".to_string())),
        }
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<String, StoreError> {
        let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        let lease: LeaseGrantResponse = self
            .call("/v3/lease/grant", &LeaseGrantRequest { ttl: secs })
            .await?;
        debug!(lease = %lease.id, ttl = secs, "granted etcd lease");
        Ok(lease.id)
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let request = RangeRequest {
            key: STANDARD.encode(key),
            range_end: None,
        };
        let response: RangeResponse = self.call("/v3/kv/range", &request).await?;
        match response.kvs.into_iter().next() {
            Some(kv) => Ok(Some(decode("value", &kv.value)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let lease = match ttl {
            Some(ttl) if !ttl.is_zero() => Some(self.grant_lease(ttl).await?),
            _ => None,
        };
        let request = PutRequest {
            key: STANDARD.encode(key),
            value: STANDARD.encode(value),
            lease,
        };
        let _: PutResponse = self.call("/v3/kv/put", &request).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let request = RangeRequest {
            key: STANDARD.encode(prefix),
            range_end: Some(STANDARD.encode(prefix_range_end(prefix.as_bytes()))),
        };
        let response: RangeResponse = self.call("/v3/kv/range", &request).await?;
        response
            .kvs
            .into_iter()
            .map(|kv| Ok((decode("key", &kv.key)?, decode("value", &kv.value)?)))
            .collect()
    }
}
