// tsflow-core/src/infrastructure/storage/filesystem.rs
//
// Layout:
//   <root>/data/<datastream>/<datastream>.<YYYYMMDD>.<hhmmss>.json
//   <root>/ancillary/<datastream>/<original file name>

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::domain::dataset::Dataset;
use crate::error::TsflowError;
use crate::infrastructure::error::InfrastructureError;
use crate::infrastructure::fs::{parse_json, write_json_atomic};
use crate::ports::storage::Storage;

const EXTENSION: &str = "json";
const TIMESTAMP_FORMAT: &str = "%Y%m%d.%H%M%S";
const MAX_CONCURRENT_READS: usize = 8;

#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self, datastream: &str) -> PathBuf {
        self.root.join("data").join(datastream)
    }

    pub fn ancillary_dir(&self, datastream: &str) -> PathBuf {
        self.root.join("ancillary").join(datastream)
    }

    /// `<datastream>.<YYYYMMDD>.<hhmmss>.json`, stamped with the dataset's first time.
    pub fn filename(datastream: &str, start: DateTime<Utc>) -> String {
        format!(
            "{}.{}.{}",
            datastream,
            start.format(TIMESTAMP_FORMAT),
            EXTENSION
        )
    }

    /// Start time encoded in a file name written by [`Self::filename`].
    pub fn parse_filename(datastream: &str, filename: &str) -> Option<DateTime<Utc>> {
        let stamp = filename
            .strip_prefix(datastream)?
            .strip_prefix('.')?
            .strip_suffix(EXTENSION)?
            .strip_suffix('.')?;
        NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Files of `datastream` whose start time lies in `[start, end]`, by name.
    ///
    /// Only the filename is inspected, so a file starting just before `start`
    /// is not returned even if its data overlaps the range.
    pub fn find_data(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        datastream: &str,
    ) -> Vec<PathBuf> {
        let dir = self.data_dir(datastream);
        if !dir.is_dir() {
            return Vec::new();
        }

        let mut found: Vec<PathBuf> = WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let name = e.file_name().to_str()?;
                let stamp = Self::parse_filename(datastream, name)?;
                (start <= stamp && stamp <= end).then(|| e.path().to_path_buf())
            })
            .collect();
        found.sort();
        found
    }
}

fn missing(what: &str) -> InfrastructureError {
    InfrastructureError::StorageError(format!("Cannot store a dataset without {}", what))
}

#[async_trait]
impl Storage for FileSystemStorage {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn fetch_data(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        datastream: &str,
    ) -> Result<Option<Dataset>, TsflowError> {
        let files = self.find_data(start, end, datastream);
        debug!(files = files.len(), "Matched stored files");
        if files.is_empty() {
            return Ok(None);
        }

        // Reads run concurrently; `buffered` keeps the filename (= time) order.
        let reads = files.into_iter().map(|path| async move {
            let content = tokio::fs::read(&path)
                .await
                .map_err(|e| InfrastructureError::read_file(&path, e))?;
            parse_json::<Dataset>(&path, &content)
        });
        let datasets: Vec<Result<Dataset, InfrastructureError>> = futures::stream::iter(reads)
            .buffered(MAX_CONCURRENT_READS)
            .collect()
            .await;
        let datasets = datasets.into_iter().collect::<Result<Vec<_>, _>>()?;

        Ok(Dataset::concat_time(datasets)?)
    }

    #[instrument(skip_all, fields(root = %self.root.display()))]
    async fn save_data(&self, dataset: &Dataset) -> Result<PathBuf, TsflowError> {
        let datastream = dataset
            .datastream()
            .ok_or_else(|| missing("a 'datastream' attribute"))?;
        let (start, _) = dataset
            .time_bounds()
            .ok_or_else(|| missing("a 'time' variable"))?;

        let dir = self.data_dir(datastream);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(Self::filename(datastream, start));

        write_json_atomic(&path, dataset)?;
        info!(datastream, path = %path.display(), "Saved dataset");
        Ok(path)
    }

    #[instrument(skip(self))]
    async fn save_ancillary_file(
        &self,
        path: &Path,
        datastream: &str,
    ) -> Result<PathBuf, TsflowError> {
        let name = path.file_name().ok_or_else(|| {
            InfrastructureError::StorageError(format!("'{}' has no file name", path.display()))
        })?;
        let dir = self.ancillary_dir(datastream);
        tokio::fs::create_dir_all(&dir).await?;

        let target = dir.join(name);
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| InfrastructureError::read_file(path, e))?;
        info!(target = %target.display(), "Saved ancillary file");
        Ok(target)
    }
}
