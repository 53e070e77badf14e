//! The object store seam used by the batch runner and the event processor.

use crate::{
    models::object::{DiscoveredObject, StoredObject},
    services::storage_service::StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

/// Outcome of one readiness probe performed by a store backend.
#[derive(Serialize, Debug, Clone)]
pub struct ReadinessCheck {
    pub name: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects under `prefix`, sorted by key. Directory placeholders
    /// (keys ending in `/`) are not returned.
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<DiscoveredObject>>;

    /// Read a whole object into memory.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Write a whole object, overwriting any previous version.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<StoredObject>;

    /// Backend specific health probes.
    async fn readiness(&self) -> Vec<ReadinessCheck> {
        Vec::new()
    }
}
