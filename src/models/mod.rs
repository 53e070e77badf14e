//! Core data models for the thumbnailing pipeline.
//!
//! Objects map to the local store's SQLite rows via `sqlx::FromRow`; events
//! are parsed from the JSON bodies delivered to the service endpoint.

pub mod event;
pub mod object;
