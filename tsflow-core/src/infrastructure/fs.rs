// tsflow-core/src/infrastructure/fs.rs

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::Path;

use crate::domain::dataset::Dataset;
use crate::infrastructure::error::InfrastructureError;

/// Writes `content` to `path` through a temporary file in the same directory,
/// renamed into place once complete. Readers see the old file or the new
/// one, never a partial write.
pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
) -> Result<(), InfrastructureError> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    // Same directory, so the rename never crosses filesystems.
    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(content.as_ref())?;
    temp_file.flush()?;
    temp_file
        .persist(path)
        .map_err(|e| InfrastructureError::Io(e.error))?;

    Ok(())
}

pub fn write_json_atomic<P: AsRef<Path>, T: Serialize>(
    path: P,
    value: &T,
) -> Result<(), InfrastructureError> {
    let content = serde_json::to_vec_pretty(value)?;
    atomic_write(path, content)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, InfrastructureError> {
    let content = std::fs::read(path).map_err(|e| InfrastructureError::read_file(path, e))?;
    parse_json(path, &content)
}

pub(crate) fn parse_json<T: DeserializeOwned>(
    path: &Path,
    content: &[u8],
) -> Result<T, InfrastructureError> {
    serde_json::from_slice(content).map_err(|source| InfrastructureError::DatasetFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads a dataset from its JSON representation.
pub fn load_dataset(path: &Path) -> Result<Dataset, InfrastructureError> {
    read_json(path)
}
