//! v0 API handlers.

use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, RawQuery, State};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode, Uri};
use axum::Json;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

use super::{ApiError, Registry};
use crate::model::{Instance, Labels, Node, Service};
use crate::selector::{label_matches, Selector};

type Created<T> = (StatusCode, Json<T>);

/// Single path parameter, rejected as an [`ApiError`] instead of plain text.
pub(super) struct PathId(String);

impl<S> FromRequestParts<S> for PathId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::Validation(format!("invalid path: {}", e.body_text())))?;
        Ok(PathId(id))
    }
}

/// Any path outside the v0 routes.
pub(super) async fn no_route(uri: Uri) -> ApiError {
    ApiError::NoRoute(uri.path().to_string())
}

/// A v0 route hit with a method it does not serve.
pub(super) async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    ApiError::MethodNotAllowed {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::Validation(format!("invalid body: {e}")))
}

/// Parse a query string into a label query. Repeated keys keep their first value.
fn parse_query(raw: Option<&str>) -> Result<Labels, ApiError> {
    let raw = raw.unwrap_or_default();

    let bytes = raw.as_bytes();
    for (i, _) in raw.match_indices('%') {
        let escape = bytes.get(i + 1..i + 3);
        if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
            return Err(ApiError::Validation(format!("invalid escape in query string: {raw}")));
        }
    }

    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw)
        .map_err(|e| ApiError::Validation(format!("invalid query string: {e}")))?;

    let mut query = Labels::new();
    for (key, value) in pairs {
        if key.is_empty() {
            return Err(ApiError::Validation(format!("empty key in query string: {raw}")));
        }
        query.entry(key).or_insert(value);
    }
    Ok(query)
}

/// Longest accepted registration TTL; etcd's lease ceiling.
const MAX_TTL_SECS: u64 = 9_000_000_000;

/// Optional `ttl=<seconds>` on instance writes. Zero means no expiry.
fn parse_ttl(raw: Option<&str>) -> Result<Option<Duration>, ApiError> {
    let query = parse_query(raw)?;
    match query.get("ttl") {
        None => Ok(None),
        Some(value) => {
            let secs: u64 = value
                .parse()
                .map_err(|_| ApiError::Validation(format!("invalid ttl: {value}")))?;
            if secs > MAX_TTL_SECS {
                return Err(ApiError::Validation(format!(
                    "ttl {secs} exceeds maximum of {MAX_TTL_SECS} seconds"
                )));
            }
            Ok((secs > 0).then(|| Duration::from_secs(secs)))
        }
    }
}

/// `PUT /v0/node/instances/{app}`: register an app on this server's node.
pub(super) async fn create_instance_node(
    State(registry): State<Registry>,
    PathId(app): PathId,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> Result<Created<Instance>, ApiError> {
    let ttl = parse_ttl(raw.as_deref())?;
    let mut instance: Instance = parse_body(&body)?;

    let node = registry.node();
    instance.node = node.id.clone();
    instance.labels.insert("app".to_string(), app.clone());
    instance.id = format!("{}-{}", node.id, app);
    if instance.address.is_none() {
        instance.address = node.address;
    }

    registry.store().put(&instance, ttl).await?;
    debug!(id = %instance.id, up = instance.up, ?ttl, "registered node instance");
    Ok((StatusCode::CREATED, Json(instance)))
}

/// `GET /v0/node/instances`: this node's instances, filtered by labels.
pub(super) async fn list_instances_node(
    State(registry): State<Registry>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Vec<Instance>>, ApiError> {
    let query = parse_query(raw.as_deref())?;
    let instances = registry
        .list_instances(&[Selector::node(registry.node()), Selector::labels(query)])
        .await?;
    Ok(Json(instances))
}

/// `GET /v0/node`: the node this server runs on.
pub(super) async fn get_local_node(State(registry): State<Registry>) -> Json<Node> {
    Json(registry.node().clone())
}

/// `GET /v0/nodes`
pub(super) async fn list_nodes(State(registry): State<Registry>) -> Result<Json<Vec<Node>>, ApiError> {
    Ok(Json(registry.store().scan::<Node>().await?))
}

/// `GET /v0/nodes/{id}`
pub(super) async fn get_node(
    State(registry): State<Registry>,
    PathId(id): PathId,
) -> Result<Json<Node>, ApiError> {
    Ok(Json(registry.store().fetch::<Node>(&id).await?))
}

/// `PUT /v0/instances/{id}`: create or replace an instance by id.
pub(super) async fn create_instance(
    State(registry): State<Registry>,
    PathId(id): PathId,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> Result<Created<Instance>, ApiError> {
    let ttl = parse_ttl(raw.as_deref())?;
    let mut instance: Instance = parse_body(&body)?;

    if instance.labels.is_empty() {
        return Err(ApiError::MissingLabel);
    }
    if instance.address.is_none() && instance.node.is_empty() {
        return Err(ApiError::InvalidInstance);
    }
    instance.id = id;

    registry.store().put(&instance, ttl).await?;
    debug!(id = %instance.id, node = %instance.node, ?ttl, "stored instance");
    Ok((StatusCode::CREATED, Json(instance)))
}

/// `GET /v0/instances/{id}`
pub(super) async fn get_instance(
    State(registry): State<Registry>,
    PathId(id): PathId,
) -> Result<Json<Instance>, ApiError> {
    Ok(Json(registry.store().fetch::<Instance>(&id).await?))
}

/// `GET /v0/instances`: all instances, filtered by labels.
pub(super) async fn list_instances(
    State(registry): State<Registry>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Vec<Instance>>, ApiError> {
    let query = parse_query(raw.as_deref())?;
    Ok(Json(registry.list_instances(&[Selector::labels(query)]).await?))
}

/// `PUT /v0/services/{id}`: create or replace a service definition.
pub(super) async fn create_service(
    State(registry): State<Registry>,
    PathId(id): PathId,
    body: Bytes,
) -> Result<Created<Service>, ApiError> {
    let mut service: Service = parse_body(&body)?;

    if service.labels.is_empty() {
        return Err(ApiError::MissingLabel);
    }
    if service.query.is_empty() {
        return Err(ApiError::MissingQuery);
    }
    service.id = id;
    service.instances.clear();

    registry.store().put(&service, None).await?;
    info!(id = %service.id, query = ?service.query, "stored service");
    Ok((StatusCode::CREATED, Json(service)))
}

/// `GET /v0/services/{id}`: the service with its up instances matching its query.
pub(super) async fn get_service(
    State(registry): State<Registry>,
    PathId(id): PathId,
) -> Result<Json<Service>, ApiError> {
    let mut service = registry.store().fetch::<Service>(&id).await?;
    service.instances = registry
        .list_instances(&[Selector::labels(service.query.clone()), Selector::Up])
        .await?;
    Ok(Json(service))
}

/// `GET /v0/services`: services whose own labels match the query.
pub(super) async fn list_services(
    State(registry): State<Registry>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Vec<Service>>, ApiError> {
    let query = parse_query(raw.as_deref())?;
    let services = registry
        .store()
        .scan::<Service>()
        .await?
        .into_iter()
        .filter(|s| label_matches(&s.labels, &query))
        .collect();
    Ok(Json(services))
}
