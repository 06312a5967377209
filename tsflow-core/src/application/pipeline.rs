// tsflow-core/src/application/pipeline.rs

use chrono::Duration;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

use crate::domain::dataset::Dataset;
use crate::domain::qc::{HandlerRegistry, QcEngine, QcSummary};
use crate::error::TsflowError;
use crate::infrastructure::config::PipelineConfig;
use crate::ports::storage::Storage;

#[derive(Debug, Serialize)]
pub struct RunResult {
    pub datastream: String,
    pub tests_applied: usize,
    pub flagged_variables: Vec<String>,
    pub used_previous: bool,
    pub saved_to: PathBuf,
}

impl RunResult {
    fn new(datastream: &str, summary: &QcSummary, used_previous: bool, saved_to: PathBuf) -> Self {
        Self {
            datastream: datastream.to_string(),
            tests_applied: summary.tests_applied(),
            flagged_variables: summary
                .flagged_variables()
                .into_iter()
                .map(str::to_string)
                .collect(),
            used_previous,
            saved_to,
        }
    }
}

/// Quality-controls `dataset` and persists it.
///
/// 1. stamps the configured datastream on the dataset;
/// 2. fetches the previously stored data over `[start - lookback, start)`;
/// 3. applies the QC suite;
/// 4. saves the result. A failed QC pass returns its error and saves nothing.
#[instrument(skip_all, fields(datastream = %config.datastream))]
pub async fn run_pipeline(
    mut dataset: Dataset,
    config: &PipelineConfig,
    storage: &dyn Storage,
    registry: &HandlerRegistry,
) -> Result<RunResult, TsflowError> {
    dataset.set_datastream(&config.datastream);

    let previous = fetch_previous(&dataset, config, storage).await;
    if previous.is_some() {
        info!("Using previously stored data for stateful tests");
    }

    let summary = QcEngine::new(registry).apply_tests(
        &mut dataset,
        &config.qc_tests,
        previous.as_ref(),
    )?;

    let saved_to = storage.save_data(&dataset).await?;
    Ok(RunResult::new(
        &config.datastream,
        &summary,
        previous.is_some(),
        saved_to,
    ))
}

/// A missing or unreadable previous dataset only disables stateful checks.
async fn fetch_previous(
    dataset: &Dataset,
    config: &PipelineConfig,
    storage: &dyn Storage,
) -> Option<Dataset> {
    let lookback = config.storage.lookback_hours;
    if lookback == 0 {
        return None;
    }
    let (start, _) = dataset.time_bounds()?;
    let window_start = start - Duration::hours(i64::from(lookback));
    let window_end = start - Duration::seconds(1);

    match storage
        .fetch_data(window_start, window_end, &config.datastream)
        .await
    {
        Ok(previous) => previous,
        Err(e) => {
            warn!(error = %e, "Could not fetch previous data, continuing without it");
            None
        }
    }
}
