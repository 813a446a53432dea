//! Registry HTTP server setup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{router, Registry};
use crate::config::{RegistryConfig, StoreBackend};
use crate::error::Error;
use crate::model::Node;
use crate::store::{EtcdStore, KvStore, MemoryStore, Store};

/// Build the store adapter a registry config asks for.
pub fn build_store(config: &RegistryConfig) -> Result<Store, Error> {
    let backend: Arc<dyn KvStore> = match config.store {
        StoreBackend::Etcd => Arc::new(EtcdStore::new(
            config.etcd_endpoints.clone(),
            config.store_timeout(),
        )?),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(Store::new(backend, config.prefix.clone(), config.store_timeout()))
}

/// Registry HTTP API bound to one node.
pub struct RegistryServer {
    listen_addr: SocketAddr,
    registry: Registry,
}

impl RegistryServer {
    /// Create a server for `node`, persisting to `store`.
    pub fn new(config: &RegistryConfig, store: Store, node: Node) -> Self {
        Self {
            listen_addr: config.listen_addr,
            registry: Registry::new(store, node),
        }
    }

    /// Shared registry state.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Bind the configured address and serve until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), Error> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        self.serve(listener, cancel).await
    }

    /// Save this node's record, then serve on an already bound listener.
    ///
    /// Failing to save the node is fatal: nothing is served.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), Error> {
        let node = self.registry.node();
        info!(
            node = %node.id,
            ip = ?node.address,
            prefix = %self.registry.store().prefix(),
            "Saving node record"
        );
        self.registry.save_node().await?;

        let addr = listener.local_addr()?;
        info!(%addr, "Registry HTTP API listening");

        axum::serve(listener, router(self.registry))
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;

        info!("Registry server stopped");
        Ok(())
    }
}
