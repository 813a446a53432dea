//! Registry service: node, instance and service CRUD over HTTP.
//!
//! Every handler is stateless; all state lives in the store. Writes are full
//! overwrites (last writer wins) and list endpoints scan the whole directory,
//! then filter with [`crate::selector`].

mod error;
mod handlers;
mod server;

pub use error::{ApiError, ErrorBody};
pub use server::{build_store, RegistryServer};

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, put};
use axum::Router;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

use crate::metrics;
use crate::model::{Instance, Node};
use crate::selector::{self, Selector};
use crate::store::{Store, StoreError};

/// Shared handler state: the store and the node this server runs on.
#[derive(Debug, Clone)]
pub struct Registry {
    store: Store,
    node: Arc<Node>,
}

impl Registry {
    /// Create a registry for `node` persisting to `store`.
    pub fn new(store: Store, node: Node) -> Self {
        Self {
            store,
            node: Arc::new(node),
        }
    }

    /// The node this registry server represents.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Underlying store adapter.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Write this server's own node record.
    pub async fn save_node(&self) -> Result<(), StoreError> {
        self.store.put(self.node.as_ref(), None).await
    }

    /// Fetch every instance and keep those passing all selectors.
    pub async fn list_instances(&self, selectors: &[Selector]) -> Result<Vec<Instance>, StoreError> {
        let instances = self.store.scan::<Instance>().await?;
        Ok(selector::filter(instances, selectors))
    }
}

async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().clone();
    let response = next.run(request).await;
    metrics::record_api_request(method.as_str(), &route, response.status().as_u16());
    response
}

/// Build the v0 API router. Responses are gzip-compressed when the client accepts it.
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/v0/node", get(handlers::get_local_node))
        .route("/v0/node/instances", get(handlers::list_instances_node))
        .route("/v0/node/instances/{app}", put(handlers::create_instance_node))
        .route("/v0/nodes", get(handlers::list_nodes))
        .route("/v0/nodes/{id}", get(handlers::get_node))
        .route("/v0/instances", get(handlers::list_instances))
        .route(
            "/v0/instances/{id}",
            put(handlers::create_instance).get(handlers::get_instance),
        )
        .route("/v0/services", get(handlers::list_services))
        .route(
            "/v0/services/{id}",
            put(handlers::create_service).get(handlers::get_service),
        )
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .fallback(handlers::no_route)
        .route_layer(middleware::from_fn(track_requests))
        .layer(CompressionLayer::new().gzip(true))
        .with_state(registry)
}
