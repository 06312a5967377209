// tsflow-core/src/infrastructure/config/pipeline.rs

use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, instrument};
use validator::{Validate, ValidationError};

use crate::domain::qc::QcTestSuite;
use crate::infrastructure::error::InfrastructureError;

pub const ENV_STORAGE_ROOT: &str = "TSFLOW_STORAGE_ROOT";
pub const ENV_DATASTREAM: &str = "TSFLOW_DATASTREAM";

/// `location.dataset[-qualifier...].level`, e.g. `sgp.met-1min.b1`.
fn re_datastream() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9_]+\.[A-Za-z0-9_]+(-[A-Za-z0-9_]+)*\.[a-z0-9]+$").unwrap_or_else(|_| {
            // Hardcoded pattern; the fallback matches nothing.
            Regex::new("$^").unwrap_or_else(|_| unreachable!())
        })
    })
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct PipelineConfig {
    #[validate(custom(function = "validate_datastream"))]
    pub datastream: String,

    #[serde(default)]
    #[validate(nested)]
    pub storage: StorageConfig,

    /// Ordered: declaration order is run order.
    #[serde(default)]
    pub qc_tests: QcTestSuite,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    #[validate(length(min = 1, message = "storage root cannot be empty"))]
    pub root: String,

    /// How far back to look for the previously stored dataset.
    #[serde(default = "default_lookback_hours")]
    #[validate(range(max = 8784))]
    pub lookback_hours: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            lookback_hours: default_lookback_hours(),
        }
    }
}

impl StorageConfig {
    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(&self.root)
    }
}

fn default_storage_root() -> String {
    "storage/root".to_string()
}

fn default_lookback_hours() -> u32 {
    24
}

fn validate_datastream(datastream: &str) -> Result<(), ValidationError> {
    if re_datastream().is_match(datastream) {
        Ok(())
    } else {
        let mut err = ValidationError::new("datastream_format");
        err.message = Some("expected '<location>.<dataset>[-<qualifier>].<level>'".into());
        Err(err)
    }
}

// --- LOADER ---

/// Loads one or more YAML files, each possibly holding several documents.
///
/// Documents are merged top-level key by key in file then document order: a
/// later `qc_tests` replaces an earlier one as a whole. An empty document is
/// ignored.
#[instrument]
pub fn load_pipeline_config(paths: &[PathBuf]) -> Result<PipelineConfig, InfrastructureError> {
    if paths.is_empty() {
        return Err(InfrastructureError::ConfigError(
            "no pipeline configuration file given".into(),
        ));
    }

    let mut merged = Mapping::new();
    for path in paths {
        if !path.exists() {
            return Err(InfrastructureError::ConfigNotFound(
                path.display().to_string(),
            ));
        }
        info!(path = %path.display(), "Loading pipeline config");
        let content =
            fs::read_to_string(path).map_err(|e| InfrastructureError::read_file(path, e))?;
        merge_documents(&mut merged, &content, path)?;
    }
    let mut config: PipelineConfig = serde_yaml::from_value(Value::Mapping(merged))?;

    // Override via environment variables ('layering' pattern):
    // TSFLOW_STORAGE_ROOT=/tmp/store tsflow run ...
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_pipeline_config(&config)?;
    Ok(config)
}

fn merge_documents(
    merged: &mut Mapping,
    content: &str,
    path: &Path,
) -> Result<(), InfrastructureError> {
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        match Value::deserialize(document)? {
            Value::Null => {}
            Value::Mapping(mapping) => {
                for (key, value) in mapping {
                    merged.insert(key, value);
                }
            }
            _ => {
                return Err(InfrastructureError::ConfigError(format!(
                    "document {} of '{}' is not a mapping",
                    index + 1,
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

pub fn parse_pipeline_config(content: &str) -> Result<PipelineConfig, InfrastructureError> {
    Ok(serde_yaml::from_str(content)?)
}

/// Applies `TSFLOW_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut PipelineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(ENV_STORAGE_ROOT) {
        info!(old = %config.storage.root, new = %val, "Overriding storage root via ENV");
        config.storage.root = val;
    }
    if let Some(val) = lookup(ENV_DATASTREAM) {
        info!(old = %config.datastream, new = %val, "Overriding datastream via ENV");
        config.datastream = val;
    }
}

/// Field rules of the pipeline and of every test. Bit uniqueness and handler
/// references are suite-level concerns, checked by `validate_config` and
/// again by the engine before a pass.
pub fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), InfrastructureError> {
    config
        .validate()
        .map_err(|e| InfrastructureError::Validation {
            section: "pipeline".into(),
            details: e.to_string(),
        })?;

    config
        .qc_tests
        .validate_tests()
        .map_err(|(test, e)| InfrastructureError::Validation {
            section: format!("qc_tests.{}", test),
            details: e.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::qc::ErrorHandlers;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const CONFIG: &str = r#"
datastream: sgp.met.b1
storage:
  root: /data/tsflow
qc_tests:
  check_missing:
    description: "Value is missing"
    qc_bit: 1
    variables: [ALL]
    exclude: [time]
    operator:
      classname: tsflow.qc.operators.CheckMissing
  check_max:
    description: "Above max"
    assessment: indeterminate
    qc_bit: 2
    variables: [temp]
    operator:
      classname: tsflow.qc.operators.CheckMax
      parameters: {value: 40}
    error_handlers:
      warn:
        classname: tsflow.qc.error_handlers.RecordWarning
      drop:
        classname: tsflow.qc.error_handlers.RemoveFailedValues
"#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_pipeline_config(CONFIG).unwrap();
        validate_pipeline_config(&config).unwrap();

        assert_eq!(config.datastream, "sgp.met.b1");
        assert_eq!(config.storage.root, "/data/tsflow");
        assert_eq!(config.storage.lookback_hours, 24);
        let names: Vec<_> = config.qc_tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["check_missing", "check_max"]);
        assert!(matches!(
            config.qc_tests.get("check_max").unwrap().error_handlers,
            ErrorHandlers::Many(ref h) if h.len() == 2
        ));
    }

    #[test]
    fn test_defaults() {
        let config = parse_pipeline_config("datastream: abc.rain-10m.a1\n").unwrap();
        validate_pipeline_config(&config).unwrap();
        assert_eq!(config.storage.root, "storage/root");
        assert!(config.qc_tests.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = parse_pipeline_config(CONFIG).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_STORAGE_ROOT, "/tmp/other"),
            (ENV_DATASTREAM, "nsa.met.c1"),
        ]);
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.storage.root, "/tmp/other");
        assert_eq!(config.datastream, "nsa.met.c1");
    }

    #[test]
    fn test_bad_datastream_rejected() {
        let config = parse_pipeline_config("datastream: not a datastream\n").unwrap();
        let err = validate_pipeline_config(&config).unwrap_err();
        assert!(matches!(err, InfrastructureError::Validation { ref section, .. } if section == "pipeline"));
    }

    #[test]
    fn test_bad_test_reported_by_name() {
        let yaml = CONFIG.replace("qc_bit: 2", "qc_bit: 40");
        let config = parse_pipeline_config(&yaml).unwrap();
        let err = validate_pipeline_config(&config).unwrap_err();
        assert!(matches!(
            err,
            InfrastructureError::Validation { ref section, .. } if section == "qc_tests.check_max"
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_pipeline_config(&[dir.path().join("nope.yaml")]).unwrap_err();
        assert!(matches!(err, InfrastructureError::ConfigNotFound(_)));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        fs::write(&path, CONFIG).unwrap();
        let config = load_pipeline_config(&[path]).unwrap();
        assert_eq!(config.qc_tests.len(), 2);
    }

    #[test]
    fn test_later_files_and_documents_win() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        fs::write(&base, CONFIG).unwrap();
        // Two documents: the second replaces the storage section of the first.
        let site = dir.path().join("site.yaml");
        fs::write(
            &site,
            "storage:\n  root: /first\n---\ndatastream: nsa.met.c1\nstorage:\n  root: /second\n  lookback_hours: 6\n",
        )
        .unwrap();

        let config = load_pipeline_config(&[base.clone(), site.clone()]).unwrap();
        assert_eq!(config.datastream, "nsa.met.c1");
        assert_eq!(config.storage.root, "/second");
        assert_eq!(config.storage.lookback_hours, 6);
        assert_eq!(config.qc_tests.len(), 2);

        // Reversed, the base file's keys win again; qc_tests only exists in base.
        let config = load_pipeline_config(&[site, base]).unwrap();
        assert_eq!(config.datastream, "sgp.met.b1");
        assert_eq!(config.storage.root, "/data/tsflow");
        assert_eq!(config.storage.lookback_hours, 24);
    }

    #[test]
    fn test_non_mapping_document_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.yaml");
        fs::write(&path, "datastream: sgp.met.b1\n---\n- a\n- b\n").unwrap();
        let err = load_pipeline_config(&[path]).unwrap_err();
        assert!(matches!(err, InfrastructureError::ConfigError(ref m) if m.contains("document 2")));
    }

    #[test]
    fn test_no_files_rejected() {
        assert!(matches!(
            load_pipeline_config(&[]).unwrap_err(),
            InfrastructureError::ConfigError(_)
        ));
    }
}
