//! Error types for onedari.
//!
//! Layer-specific errors live next to their layer (`store::StoreError`,
//! `registry::ApiError`, `client::ClientError`); this is the error for
//! process startup and lifecycle.

use thiserror::Error;

use crate::client::ClientError;
use crate::store::StoreError;

/// Errors that stop a component from starting or running.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Store error while bootstrapping the registry.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry API client error.
    #[error("registry client error: {0}")]
    Client(#[from] ClientError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Could not determine this node's name or address.
    #[error("node identity: {0}")]
    Identity(String),
}
