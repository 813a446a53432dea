//! DNS view of the registry.
//!
//! Names under the zone have exactly one of two shapes:
//!
//! ```text
//! <service>.services.<zone>   A, SRV
//! <node>.nodes.<zone>         A
//! ```
//!
//! Every question is answered by asking the registry over HTTP; nothing is
//! cached between queries.

mod handler;
mod resolver;
mod server;

pub use handler::DnsHandler;
pub use resolver::{Resolution, ZoneResolver};
pub use server::DnsServer;

use async_trait::async_trait;

use crate::client::{ApiClient, ClientError};
use crate::model::{Instance, Node, Service};

/// SRV weight and priority used when an instance does not carry a usable value.
pub const DEFAULT_SRV_VALUE: u16 = 100;

/// Where the resolver looks up services and nodes.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// A service with its live membership.
    async fn service(&self, id: &str) -> Result<Service, ClientError>;

    /// A node.
    async fn node(&self, id: &str) -> Result<Node, ClientError>;
}

#[async_trait]
impl Directory for ApiClient {
    async fn service(&self, id: &str) -> Result<Service, ClientError> {
        ApiClient::service(self, id).await
    }

    async fn node(&self, id: &str) -> Result<Node, ClientError> {
        ApiClient::node(self, id).await
    }
}

/// What a question name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// `<id>.services.<zone>`
    Service(String),
    /// `<id>.nodes.<zone>`
    Node(String),
    /// Outside the zone, or not one of the two shapes.
    Unknown,
}

/// Classify a question name relative to `zone`. Both are compared lowercased.
pub fn classify(name: &str, zone: &str) -> QueryKind {
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    let zone = zone.trim_matches('.').to_ascii_lowercase();

    let Some(rest) = name
        .strip_suffix(zone.as_str())
        .and_then(|rest| rest.strip_suffix('.'))
    else {
        return QueryKind::Unknown;
    };

    match rest.split('.').collect::<Vec<_>>().as_slice() {
        [id, "services"] if !id.is_empty() => QueryKind::Service(id.to_string()),
        [id, "nodes"] if !id.is_empty() => QueryKind::Node(id.to_string()),
        _ => QueryKind::Unknown,
    }
}

/// Read a 16-bit value from instance metadata, falling back to [`DEFAULT_SRV_VALUE`].
pub fn metadata_u16(instance: &Instance, key: &str) -> u16 {
    instance
        .metadata
        .get(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_SRV_VALUE)
}
