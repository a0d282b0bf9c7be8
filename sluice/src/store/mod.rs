//! Key-addressable object storage with optimistic concurrency.
//!
//! Objects are JSON documents addressed by a resource id. Ids are compared
//! case-insensitively, matching ARM resource-id semantics. Every successful
//! write produces a fresh [`ETag`]; passing the previously observed ETag to
//! [`StoreClient::save`] turns the write into a compare-and-swap.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;

/// Opaque write-version token returned by every save.
pub type ETag = String;

/// A stored document together with the ETag observed when it was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub id: String,
    pub etag: ETag,
    pub data: serde_json::Value,
}

impl Object {
    /// Deserialize the document body into a concrete type.
    pub fn as_type<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone()).map_err(StoreError::Codec)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    /// ETag mismatch: the object changed (or disappeared) since it was read.
    #[error("concurrent write detected for {id}")]
    Concurrency { id: String },

    #[error("invalid object payload: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, StoreError::Concurrency { .. })
    }
}

/// Object store interface.
///
/// Reads are strongly consistent. `save` with `etag = None` is an
/// unconditional upsert; with `Some(etag)` the write only succeeds if the
/// stored ETag still matches.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn get(&self, id: &str) -> Result<Object, StoreError>;

    async fn save(
        &self,
        id: &str,
        data: &serde_json::Value,
        etag: Option<&str>,
    ) -> Result<ETag, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// List objects whose ids start with `prefix`, in id order.
    async fn query(&self, prefix: &str) -> Result<Vec<Object>, StoreError>;
}
