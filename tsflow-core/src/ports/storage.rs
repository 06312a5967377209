// tsflow-core/src/ports/storage.rs

// What the pipeline needs from a persistence layer, without knowing where the
// bytes end up (local disk today, object stores later).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::domain::dataset::Dataset;
use crate::error::TsflowError;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Every stored dataset of `datastream` whose start time lies in
    /// `[start, end]`, concatenated along time. `None` when nothing matches.
    async fn fetch_data(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        datastream: &str,
    ) -> Result<Option<Dataset>, TsflowError>;

    /// Persists a dataset under its `datastream` attribute. Returns where it went.
    async fn save_data(&self, dataset: &Dataset) -> Result<PathBuf, TsflowError>;

    /// Copies a side file (raw input, plot, log) next to the datastream.
    async fn save_ancillary_file(
        &self,
        path: &Path,
        datastream: &str,
    ) -> Result<PathBuf, TsflowError>;
}
