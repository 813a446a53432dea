//! HTTP client for the registry API.
//!
//! The DNS engine and the announce loop only ever talk to the registry over
//! its public HTTP API, never to the store directly.

use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

use crate::model::{Instance, Node, Service};

/// Errors returned by [`ApiClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The registry answered 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry answered with an unexpected status.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// Transport, timeout or body decoding failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured endpoint is not a usable base URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ClientError {
    /// Whether the registry reported the entity as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// Registry API client with a fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl ApiClient {
    /// Create a client for a registry base URL such as `http://127.0.0.1:63412`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ClientError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(ClientError::InvalidEndpoint(endpoint.to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// Base URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        let url = self.url(segments)?;
        trace!(%url, "registry GET");
        let response = self.client.get(url.clone()).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(url.path().to_string())),
            status => Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    /// Fetch a service with its live membership.
    pub async fn service(&self, id: &str) -> Result<Service, ClientError> {
        self.get_json(&["v0", "services", id]).await
    }

    /// Fetch a node.
    pub async fn node(&self, id: &str) -> Result<Node, ClientError> {
        self.get_json(&["v0", "nodes", id]).await
    }

    /// Register `instance` as the registry node's `app`, expiring after `ttl`.
    pub async fn announce(
        &self,
        app: &str,
        instance: &Instance,
        ttl: Option<Duration>,
    ) -> Result<Instance, ClientError> {
        let mut url = self.url(&["v0", "node", "instances", app])?;
        if let Some(ttl) = ttl {
            url.query_pairs_mut()
                .append_pair("ttl", &ttl.as_secs().to_string());
        }
        trace!(%url, "registry PUT");

        let response = self.client.put(url.clone()).json(instance).send().await?;
        match response.status() {
            StatusCode::CREATED => Ok(response.json().await?),
            status => Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}
