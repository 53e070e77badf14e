//! Thumbnailing pipeline: pure building blocks (classifier, thumbnailer,
//! path namer, partitioner, idempotency guard), the two orchestrators and
//! the object store they run against.

pub mod batch_runner;
pub mod classifier;
pub mod event_processor;
pub mod idempotency;
pub mod object_store;
pub mod partitioner;
pub mod path_namer;
pub mod storage_service;
pub mod thumbnailer;
