//! Batch mode: one worker out of `task_count`, thumbnailing its own shard.
//!
//! Listing → Partitioning → Processing → Done | Failed. Only a bad partition
//! setting or a failed listing fails the run; per-item failures are counted
//! and the run carries on.

use crate::{
    config::InputLocation,
    errors::ConfigError,
    models::object::DiscoveredObject,
    services::{
        classifier::is_image,
        object_store::ObjectStore,
        partitioner,
        path_namer::PathNamer,
        storage_service::StorageError,
        thumbnailer::{ThumbnailError, Thumbnailer},
    },
};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to list {location}: {source}")]
    Listing {
        location: String,
        source: StorageError,
    },
}

#[derive(Debug, Error)]
enum ItemError {
    #[error("fetch failed: {0}")]
    Fetch(StorageError),
    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),
    #[error("upload of {path} failed: {source}")]
    Upload { path: String, source: StorageError },
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub task_index: usize,
    pub task_count: usize,
    pub preserve_subpath: bool,
    pub output_bucket: Option<String>,
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            task_index: 0,
            task_count: 1,
            preserve_subpath: false,
            output_bucket: None,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Objects returned by the listing.
    pub listed: usize,
    /// Listed objects classified as images, across all shards.
    pub images: usize,
    /// Images in this worker's shard.
    pub assigned: usize,
    pub processed: usize,
    pub failed: usize,
    /// Listed objects that were not images, or were thumbnails themselves.
    pub skipped: usize,
}

pub struct BatchRunner {
    store: Arc<dyn ObjectStore>,
    thumbnailer: Thumbnailer,
    namer: PathNamer,
}

impl BatchRunner {
    pub fn new(store: Arc<dyn ObjectStore>, thumbnailer: Thumbnailer, namer: PathNamer) -> Self {
        Self {
            store,
            thumbnailer,
            namer,
        }
    }

    pub async fn run(
        &self,
        location: &InputLocation,
        options: &BatchOptions,
    ) -> Result<BatchSummary, BatchError> {
        self.run_at(location, options, Utc::now()).await
    }

    /// `started_at` picks the time bucket for every output of this run.
    pub async fn run_at(
        &self,
        location: &InputLocation,
        options: &BatchOptions,
        started_at: DateTime<Utc>,
    ) -> Result<BatchSummary, BatchError> {
        partitioner::validate(options.task_count, options.task_index)?;
        info!(
            "task {}/{}: starting, input={}",
            options.task_index + 1,
            options.task_count,
            location
        );

        let listed = self
            .store
            .list(&location.bucket, &location.list_prefix())
            .await
            .map_err(|source| BatchError::Listing {
                location: location.to_string(),
                source,
            })?;

        // Thumbnails written by earlier workers of this run would otherwise
        // change the list later workers split.
        let mut images: Vec<DiscoveredObject> = listed
            .iter()
            .filter(|obj| !PathNamer::is_output_key(&obj.key) && is_image(obj))
            .cloned()
            .collect();
        // Every worker must see the same order for the shards to line up.
        images.sort_by(|a, b| a.key.cmp(&b.key));

        let mut summary = BatchSummary {
            listed: listed.len(),
            images: images.len(),
            skipped: listed.len() - images.len(),
            ..BatchSummary::default()
        };
        if images.is_empty() {
            info!(
                "task {}: no images found under {}, nothing to do",
                options.task_index, location
            );
            return Ok(summary);
        }

        let shard = partitioner::partition(&images, options.task_count, options.task_index)?;
        summary.assigned = shard.len();
        info!(
            "task {}: found {} images, {} assigned to this task",
            shard.index,
            images.len(),
            shard.len()
        );

        let output_bucket = options
            .output_bucket
            .as_deref()
            .unwrap_or(&location.bucket);

        let results: Vec<bool> = stream::iter(shard.items.iter())
            .map(|item| async move {
                match self
                    .process_item(item, location, output_bucket, options, started_at)
                    .await
                {
                    Ok(path) => {
                        info!(
                            "task {}: processed {} -> {}/{}",
                            options.task_index, item.key, output_bucket, path
                        );
                        true
                    }
                    Err(err) => {
                        warn!(
                            "task {}: error processing {}/{}: {}",
                            options.task_index, location.bucket, item.key, err
                        );
                        false
                    }
                }
            })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;

        summary.processed = results.iter().filter(|ok| **ok).count();
        summary.failed = results.len() - summary.processed;

        if summary.failed > 0 {
            error!(
                "task {}: completed with {} error(s), processed {} of {} assigned",
                options.task_index, summary.failed, summary.processed, summary.assigned
            );
        } else {
            info!(
                "task {}: completed, processed {} image(s) of {} total",
                options.task_index, summary.processed, summary.images
            );
        }
        Ok(summary)
    }

    async fn process_item(
        &self,
        item: &DiscoveredObject,
        location: &InputLocation,
        output_bucket: &str,
        options: &BatchOptions,
        started_at: DateTime<Utc>,
    ) -> Result<String, ItemError> {
        let raw = self
            .store
            .get(&location.bucket, &item.key)
            .await
            .map_err(ItemError::Fetch)?;
        let thumb = self.thumbnailer.render(raw).await?;

        let subpath_of = options.preserve_subpath.then_some(location.prefix.as_str());
        let path = self.namer.output_path(started_at, &item.key, subpath_of);
        let content_type = thumb.content_type();

        self.store
            .put(output_bucket, &path, thumb.bytes, Some(content_type))
            .await
            .map_err(|source| ItemError::Upload {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}
