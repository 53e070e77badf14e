//! Objects as seen by the thumbnailing pipeline and by the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An object returned by a listing call.
///
/// Listing results are immutable snapshots; the order they come back in is
/// whatever the store returns, so callers that need agreement across
/// processes must sort them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredObject {
    /// Full object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size: i64,

    /// Declared content type, if the store recorded one.
    pub content_type: Option<String>,
}

impl DiscoveredObject {
    pub fn new(key: impl Into<String>, size: i64, content_type: Option<String>) -> Self {
        Self {
            key: key.into(),
            size,
            content_type,
        }
    }
}

/// Metadata row kept by the local store for every object it holds.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Bucket holding the object.
    pub bucket: String,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload, lowercase hex.
    pub etag: String,

    /// Starts at 1 and is bumped on every overwrite of the same key.
    pub generation: i64,

    /// Timestamp of the last write.
    pub last_modified: DateTime<Utc>,
}

impl From<StoredObject> for DiscoveredObject {
    fn from(obj: StoredObject) -> Self {
        Self::new(obj.key, obj.size_bytes, obj.content_type)
    }
}

/// Return the last `/`-separated segment of `key`.
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
