//! Configuration types for onedari.
//!
//! Each long-running component gets its own section. Sections are plain
//! data with serde defaults; `validate()` is called once, before anything is
//! spawned.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Registry HTTP server configuration.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// DNS server configuration.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Announce client configuration.
    #[serde(default)]
    pub announce: AnnounceConfig,
}

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "onedari=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log line format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// Colourise text output.
    #[serde(default)]
    pub ansi: bool,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            ansi: false,
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "onedari".to_string()
}

/// Which key-value backend the registry persists to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// etcd v3 through its JSON gateway.
    #[default]
    Etcd,
    /// Process-local map. Nothing survives a restart.
    Memory,
}

/// Registry HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Address the HTTP API listens on.
    #[serde(default = "default_registry_addr")]
    pub listen_addr: SocketAddr,

    /// Store backend.
    #[serde(default)]
    pub store: StoreBackend,

    /// etcd gateway endpoints, tried in order.
    #[serde(default = "default_etcd_endpoints")]
    pub etcd_endpoints: Vec<String>,

    /// Key prefix for every entity.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Bound on each store operation, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub store_timeout_secs: u64,

    /// Node name; defaults to the short hostname.
    #[serde(default)]
    pub node_name: Option<String>,

    /// Node address; defaults to the primary local IPv4 address.
    #[serde(default)]
    pub node_ip: Option<Ipv4Addr>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_registry_addr(),
            store: StoreBackend::default(),
            etcd_endpoints: default_etcd_endpoints(),
            prefix: default_prefix(),
            store_timeout_secs: default_timeout_secs(),
            node_name: None,
            node_ip: None,
        }
    }
}

impl RegistryConfig {
    /// Store operation bound.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Check the section before the server starts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.store_timeout_secs == 0 {
            return Err(Error::Config("registry.store_timeout_secs must be > 0".to_string()));
        }
        if self.prefix.trim_matches('/').is_empty() {
            return Err(Error::Config("registry.prefix must not be empty".to_string()));
        }
        if self.store == StoreBackend::Etcd
            && self.etcd_endpoints.iter().all(|e| e.trim().is_empty())
        {
            return Err(Error::Config("registry.etcd_endpoints must not be empty".to_string()));
        }
        Ok(())
    }
}

fn default_registry_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 63412))
}

fn default_etcd_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

fn default_prefix() -> String {
    crate::store::DEFAULT_PREFIX.to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_api_endpoint() -> String {
    "http://127.0.0.1:63412".to_string()
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    #[serde(default = "default_dns_addr")]
    pub listen_addr: SocketAddr,

    /// Registry API base URL.
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// Zone served, e.g. "onedari.local.".
    #[serde(default = "default_zone")]
    pub zone: String,

    /// TTL for every record in an answer, in seconds.
    #[serde(default)]
    pub ttl: u32,

    /// Most answers put in one reply, to stay inside a UDP datagram.
    #[serde(default = "default_max_answers")]
    pub max_answers: usize,

    /// Bound on each registry request, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_dns_addr(),
            api_endpoint: default_api_endpoint(),
            zone: default_zone(),
            ttl: 0,
            max_answers: default_max_answers(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl DnsConfig {
    /// Registry request bound.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check the section before the server starts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.zone.trim_matches('.').is_empty() {
            return Err(Error::Config("dns.zone must not be empty".to_string()));
        }
        if self.max_answers == 0 {
            return Err(Error::Config("dns.max_answers must be > 0".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("dns.request_timeout_secs must be > 0".to_string()));
        }
        if self.api_endpoint.trim().is_empty() {
            return Err(Error::Config("dns.api_endpoint must not be empty".to_string()));
        }
        Ok(())
    }
}

fn default_dns_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 15353))
}

fn default_zone() -> String {
    "onedari.local.".to_string()
}

fn default_max_answers() -> usize {
    3
}

/// Announce client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceConfig {
    /// Registry API base URL.
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// Application name; the instance id becomes `<node>-<app>`.
    #[serde(default)]
    pub app: String,

    /// Extra labels attached to the instance.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Instance port.
    #[serde(default)]
    pub port: u16,

    /// Instance address; defaults to the primary local IPv4 address.
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,

    /// Shell command run before each announce; non-zero exit skips the tick.
    #[serde(default)]
    pub check: Option<String>,

    /// Seconds between announces.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Seconds the registration lives without a refresh; 0 disables expiry.
    #[serde(default)]
    pub ttl_secs: u64,

    /// SRV weight.
    #[serde(default = "default_srv_value")]
    pub weight: u16,

    /// SRV priority.
    #[serde(default = "default_srv_value")]
    pub priority: u16,

    /// Bound on each registry request, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            app: String::new(),
            labels: BTreeMap::new(),
            port: 0,
            ip: None,
            check: None,
            interval_secs: default_interval_secs(),
            ttl_secs: 0,
            weight: default_srv_value(),
            priority: default_srv_value(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl AnnounceConfig {
    /// Time between ticks.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Registration lifetime, if expiry is enabled.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }

    /// Registry request bound.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check the section before the loop starts.
    ///
    /// A TTL must be strictly longer than the interval so a refresh can land
    /// before the registration expires.
    pub fn validate(&self) -> Result<(), Error> {
        if self.app.trim().is_empty() {
            return Err(Error::Config("announce.app must be set".to_string()));
        }
        if self.app.contains('/') {
            return Err(Error::Config(format!("invalid app name: {}", self.app)));
        }
        if self.interval_secs == 0 {
            return Err(Error::Config("announce interval must be > 0".to_string()));
        }
        if self.ttl_secs != 0 && self.ttl_secs <= self.interval_secs {
            return Err(Error::Config(format!(
                "announce ttl ({}s) must be greater than interval ({}s)",
                self.ttl_secs, self.interval_secs
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("announce.request_timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }
}

fn default_interval_secs() -> u64 {
    60
}

fn default_srv_value() -> u16 {
    100
}
