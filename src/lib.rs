//! onedari - minimal service discovery over HTTP and DNS.
//!
//! Processes register themselves with a registry; services group them by label
//! query; a DNS server exposes both as a zone.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  PUT /v0/node/instances/:app  ┌──────────────────┐
//! │   announce   │──────────────────────────────▶│     registry     │
//! │ (check loop) │                               │   (axum, v0 API) │
//! └──────────────┘                               └────────┬─────────┘
//!                                                         │ get/set/list
//! ┌──────────────┐  GET /v0/services/:id                  ▼
//! │     dns      │──────────────────────────────▶ ┌──────────────────┐
//! │  (hickory)   │  GET /v0/nodes/:id             │  store (etcd or  │
//! └──────▲───────┘                                │  in-memory)      │
//!        │ UDP/TCP                                └──────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! web.services.onedari.local.  A    → one A per up member with an address
//! web.services.onedari.local.  SRV  → SRV to <node>.nodes.onedari.local. + A glue
//! web1.nodes.onedari.local.    A    → the node's address
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use onedari::{DnsConfig, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = DnsServer::new(DnsConfig::default()).unwrap();
//!     server.run(CancellationToken::new()).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod announce;
pub mod client;
pub mod config;
pub mod dns;
pub mod error;
pub mod metrics;
pub mod model;
pub mod node;
pub mod registry;
pub mod selector;
pub mod store;
pub mod telemetry;

// Re-export main types
pub use announce::Announcer;
pub use client::ApiClient;
pub use config::{AnnounceConfig, Config, DnsConfig, RegistryConfig, TelemetryConfig};
pub use dns::DnsServer;
pub use error::Error;
pub use model::{Instance, Node, Service};
pub use registry::RegistryServer;
pub use store::Store;
