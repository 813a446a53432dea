//! Periodic self-registration of a local application.
//!
//! Each tick optionally runs a shell check and, when it passes, PUTs the
//! instance to the registry's node-scoped endpoint. Nothing is retracted on
//! failure or exit; an expiring registration needs a TTL.

use std::net::Ipv4Addr;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ApiClient;
use crate::config::AnnounceConfig;
use crate::error::Error;
use crate::metrics::{self, AnnounceResult};
use crate::model::{Instance, Labels};
use crate::node;

/// Parse `key=value` arguments into labels, skipping anything else.
pub fn parse_labels<I, S>(args: I) -> Labels
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut labels = Labels::new();
    for arg in args {
        let arg = arg.as_ref();
        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                labels.insert(key.to_string(), value.to_string());
            }
            _ => warn!(label = %arg, "ignoring invalid label"),
        }
    }
    labels
}

/// Announce loop for one application.
pub struct Announcer {
    config: AnnounceConfig,
    client: ApiClient,
    instance: Instance,
}

impl Announcer {
    /// Validate `config` and build the instance document sent on every tick.
    ///
    /// The address is `config.ip` or the primary local IPv4 address.
    pub fn new(config: AnnounceConfig) -> Result<Self, Error> {
        config.validate()?;
        let address = match config.ip {
            Some(ip) => ip,
            None => node::local_ipv4()?,
        };
        let client = ApiClient::new(&config.api_endpoint, config.request_timeout())?;
        let instance = build_instance(&config, address);
        Ok(Self {
            config,
            client,
            instance,
        })
    }

    /// Instance document sent to the registry.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Run the check, if any. A check that outlives the interval counts as failed.
    async fn check(&self) -> bool {
        let Some(check) = &self.config.check else {
            return true;
        };

        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(check)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.config.interval(), output).await {
            Ok(Ok(output)) if output.status.success() => true,
            Ok(Ok(output)) => {
                warn!(
                    %check,
                    status = %output.status,
                    stdout = %String::from_utf8_lossy(&output.stdout).trim(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "check failed"
                );
                false
            }
            Ok(Err(e)) => {
                warn!(%check, error = %e, "check could not be run");
                false
            }
            Err(_) => {
                warn!(%check, timeout = ?self.config.interval(), "check timed out");
                false
            }
        }
    }

    /// One announce: check, then PUT.
    pub async fn tick(&self) -> AnnounceResult {
        let result = if !self.check().await {
            AnnounceResult::CheckFailed
        } else {
            match self
                .client
                .announce(&self.config.app, &self.instance, self.config.ttl())
                .await
            {
                Ok(stored) => {
                    debug!(id = %stored.id, node = %stored.node, "announced");
                    AnnounceResult::Announced
                }
                Err(e) => {
                    error!(app = %self.config.app, error = %e, "announce failed");
                    AnnounceResult::Error
                }
            }
        };
        metrics::record_announce(&self.config.app, result);
        result
    }

    /// Announce immediately, then every interval, until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            app = %self.config.app,
            api_endpoint = %self.config.api_endpoint,
            interval = ?self.config.interval(),
            ttl = ?self.config.ttl(),
            check = ?self.config.check,
            "Starting announce loop"
        );

        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(app = %self.config.app, "announce loop stopped");
                    return;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

fn build_instance(config: &AnnounceConfig, address: Ipv4Addr) -> Instance {
    let mut instance = Instance::new();
    instance.address = Some(address);
    instance.port = config.port;
    instance.labels = config.labels.clone();
    instance.weight = config.weight;
    instance.priority = config.priority;
    instance
        .metadata
        .insert("weight".to_string(), config.weight.to_string());
    instance
        .metadata
        .insert("priority".to_string(), config.priority.to_string());
    // Only sent once any check has passed.
    instance.up = true;
    instance
}
