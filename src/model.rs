//! Registry entities shared by the HTTP API, the store and the DNS engine.
//!
//! JSON field names are part of the wire contract and of the persisted
//! layout, so they are pinned with `serde(rename)` where they differ from the
//! Rust field names.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Flat string map used both for labels and for label queries.
pub type Labels = BTreeMap<String, String>;

/// Reads `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A registered host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node name, derived from the store key when read back.
    #[serde(default)]
    pub id: String,

    /// Base IPv4 address of the host.
    #[serde(rename = "ip", default)]
    pub address: Option<Ipv4Addr>,
}

impl Node {
    /// Create a node record.
    pub fn new(id: impl Into<String>, address: Ipv4Addr) -> Self {
        Self {
            id: id.into(),
            address: Some(address),
        }
    }
}

/// One running occurrence of an application on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance id; `<node>-<app>` for node-scoped registrations.
    #[serde(default)]
    pub id: String,

    /// Id of the owning node, empty for external instances.
    #[serde(default)]
    pub node: String,

    /// Labels matched by service queries.
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Labels,

    /// Free-form string metadata. `weight` and `priority` feed SRV answers.
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Labels,

    /// Instance address; node-scoped registrations fall back to the node's.
    #[serde(rename = "ip", default)]
    pub address: Option<Ipv4Addr>,

    /// Port the application listens on; the SRV port.
    #[serde(default)]
    pub port: u16,

    /// Liveness as last reported. Only up instances are service members.
    #[serde(default)]
    pub up: bool,

    /// Typed SRV priority. DNS answers read `metadata["priority"]`.
    #[serde(default)]
    pub priority: u16,

    /// Typed SRV weight. DNS answers read `metadata["weight"]`.
    #[serde(default)]
    pub weight: u16,
}

impl Instance {
    /// A blank instance whose label and metadata maps are ready to insert into.
    pub fn new() -> Self {
        Self::default()
    }
}

/// A named grouping of instances selected by label query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service name, also the DNS label under `services`.
    #[serde(default)]
    pub id: String,

    /// Labels classifying the service itself.
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Labels,

    /// Label selector computing membership at read time.
    #[serde(default, deserialize_with = "null_as_default")]
    pub query: Labels,

    /// Live membership. Only ever populated in read responses.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub instances: Vec<Instance>,
}
