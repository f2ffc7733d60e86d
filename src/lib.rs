//! Weekly cohort activity pipeline for character progression snapshots.
//!
//! Raw snapshot rows are typed ([`ingest`]), ordered per character and
//! classified as first-seen, growing or stagnant with a level bucket
//! ([`activity`]), then aggregated into per-week level distributions and
//! stagnation summaries ([`aggregate`]). [`pipeline::CohortPipeline`] ties the
//! stages together behind a [`cache::ResultCache`] keyed by source identity.

pub mod activity;
pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod report;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{CohortPipeline, PipelineOutput};
