//! src/services/storage_service.rs
//!
//! StorageService: the local `ObjectStore` backend. Object payloads live on
//! disk sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`; metadata
//! (content type, size, etag, generation) lives in SQLite.

use crate::{
    models::object::{DiscoveredObject, StoredObject, basename},
    services::object_store::{ObjectStore, ReadinessCheck},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::ObjectNotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const OBJECT_COLUMNS: &str =
    "id, bucket, key, content_type, size_bytes, etag, generation, last_modified";

#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl StorageService {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Rejects empty or oversized keys, absolute keys, `..` and control
    /// characters.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.ends_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// S3-like bucket naming rules: 3–63 characters of lowercase letters,
    /// digits, dots and hyphens, starting and ending alphanumeric, no
    /// consecutive dots, not shaped like an IPv4 address.
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// First two bytes of MD5(bucket/key) as hex, used as two directory levels.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE bucket = ? AND key = ?"
        ))
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Write the payload to a temp file, fsync, rename into place.
    async fn write_payload(&self, file_path: &Path, data: &[u8]) -> StorageResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        Ok(())
    }

    async fn check_sqlite(&self) -> ReadinessCheck {
        let result = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await;
        let error = match result {
            Ok(1) => None,
            Ok(v) => Some(format!("unexpected result: {}", v)),
            Err(e) => Some(format!("error: {}", e)),
        };
        ReadinessCheck {
            name: "sqlite",
            ok: error.is_none(),
            error,
        }
    }

    /// Best-effort write/read/delete of a temp file under `base_path`.
    async fn check_disk(&self) -> ReadinessCheck {
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        let (ok, error) = match fs::write(&tmp_path, b"readyz").await {
            Ok(_) => match fs::read(&tmp_path).await {
                Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                    Ok(_) => (true, None),
                    Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
                },
                Ok(_) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some("file content mismatch".to_string()))
                }
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some(format!("could not read tmp file: {}", e)))
                }
            },
            Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
        };
        ReadinessCheck {
            name: "disk",
            ok,
            error,
        }
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<DiscoveredObject>> {
        self.ensure_bucket_name_safe(bucket)?;

        // substr() instead of LIKE so `%` and `_` in prefixes match literally.
        let rows = sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE bucket = ? AND substr(key, 1, length(?)) = ?
             ORDER BY key ASC"
        ))
        .bind(bucket)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&*self.db)
        .await?;

        debug!("listed {} objects under {}/{}", rows.len(), bucket, prefix);
        Ok(rows
            .into_iter()
            .filter(|obj| !obj.key.ends_with('/'))
            .map(DiscoveredObject::from)
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.ensure_key_safe(key)?;
        self.ensure_bucket_name_safe(bucket)?;
        self.fetch_object(bucket, key).await?;

        let file_path = self.object_path(bucket, key);
        let data = fs::read(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok(Bytes::from(data))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<StoredObject> {
        self.ensure_key_safe(key)?;
        self.ensure_bucket_name_safe(bucket)?;

        let file_path = self.object_path(bucket, key);
        self.write_payload(&file_path, &data).await?;

        let etag = format!("{:x}", md5::compute(&data));
        debug!(
            "stored {} bytes for {}/{} ({})",
            data.len(),
            bucket,
            basename(key),
            etag
        );

        sqlx::query_as::<_, StoredObject>(&format!(
            "INSERT INTO objects (
                id, bucket, key, content_type, size_bytes, etag, generation, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                generation = objects.generation + 1,
                last_modified = excluded.last_modified
            RETURNING {OBJECT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(data.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
        .map_err(StorageError::Sqlx)
    }

    async fn readiness(&self) -> Vec<ReadinessCheck> {
        vec![self.check_sqlite().await, self.check_disk().await]
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn service() -> (StorageService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let service = StorageService::new(Arc::new(pool), dir.path());
        service.migrate().await.unwrap();
        (service, dir)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_payload() {
        let (svc, _dir) = service().await;
        let stored = svc
            .put("photos", "2025/cat.jpg", Bytes::from_static(b"meow"), Some("image/jpeg"))
            .await
            .unwrap();
        assert_eq!(stored.generation, 1);
        assert_eq!(stored.size_bytes, 4);
        assert_eq!(stored.etag, format!("{:x}", md5::compute(b"meow")));

        let data = svc.get("photos", "2025/cat.jpg").await.unwrap();
        assert_eq!(&data[..], b"meow");
    }

    #[tokio::test]
    async fn overwrite_bumps_generation() {
        let (svc, _dir) = service().await;
        svc.put("photos", "a.png", Bytes::from_static(b"1"), None).await.unwrap();
        let second = svc
            .put("photos", "a.png", Bytes::from_static(b"22"), Some("image/png"))
            .await
            .unwrap();
        assert_eq!(second.generation, 2);
        assert_eq!(second.content_type.as_deref(), Some("image/png"));
        assert_eq!(&svc.get("photos", "a.png").await.unwrap()[..], b"22");
    }

    #[tokio::test]
    async fn list_filters_by_literal_prefix_in_key_order() {
        let (svc, _dir) = service().await;
        for key in ["in/b.png", "in/a.png", "in%/c.png", "out/d.png"] {
            svc.put("photos", key, Bytes::from_static(b"x"), None).await.unwrap();
        }
        let keys: Vec<String> = svc
            .list("photos", "in/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["in/a.png", "in/b.png"]);

        let everything = svc.list("photos", "").await.unwrap();
        assert_eq!(everything.len(), 4);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (svc, _dir) = service().await;
        let err = svc.get("photos", "nope.jpg").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn rejects_unsafe_keys_and_bucket_names() {
        let (svc, _dir) = service().await;
        for key in ["", "/abs", "../escape", "dir/", "tab\tkey"] {
            assert!(matches!(
                svc.put("photos", key, Bytes::new(), None).await,
                Err(StorageError::InvalidObjectKey)
            ));
        }
        for bucket in ["ab", "Upper", "-dash", "a..b", "192.168.0.1"] {
            assert!(matches!(
                svc.put(bucket, "k", Bytes::new(), None).await,
                Err(StorageError::InvalidBucketName { .. })
            ));
        }
    }

    #[tokio::test]
    async fn readiness_reports_sqlite_and_disk() {
        let (svc, _dir) = service().await;
        let checks = svc.readiness().await;
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|c| c.ok), "{:?}", checks);
    }

    #[test]
    fn ipv4_detection() {
        assert!(is_ipv4_like("10.0.0.1"));
        assert!(!is_ipv4_like("10.0.0"));
        assert!(!is_ipv4_like("my.bucket.name.x"));
        assert!(!is_ipv4_like("300.1.1.1"));
    }
}
