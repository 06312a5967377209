// tsflow/src/commands/run.rs
//
// USE CASE: Quality-control a dataset and store it.

use std::path::PathBuf;

use anyhow::Context;
use tsflow_core::application::run_pipeline;
use tsflow_core::domain::qc::HandlerRegistry;
use tsflow_core::infrastructure::FileSystemStorage;
use tsflow_core::infrastructure::config::load_pipeline_config;
use tsflow_core::infrastructure::fs::load_dataset;
use tsflow_core::ports::Storage;

pub async fn execute(
    config_paths: Vec<PathBuf>,
    input: PathBuf,
    storage_root: Option<PathBuf>,
    ancillary: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let start = std::time::Instant::now();

    // A. Load the Config (Infra)
    println!("⚙️  Loading configuration...");
    let config = load_pipeline_config(&config_paths).with_context(|| {
        format!("Failed to load pipeline configuration from {:?}", config_paths)
    })?;
    println!(
        "   Datastream: {} ({} QC tests)",
        config.datastream,
        config.qc_tests.len()
    );

    let dataset = load_dataset(&input)
        .with_context(|| format!("Failed to load input dataset from {:?}", input))?;

    // B. Adapters
    let root = storage_root.unwrap_or_else(|| config.storage.root_path());
    let storage = FileSystemStorage::new(root);
    let registry = HandlerRegistry::with_builtins();

    // C. Run the Pipeline (Application Layer)
    match run_pipeline(dataset, &config, &storage, &registry).await {
        Ok(result) => {
            for file in &ancillary {
                let saved = storage
                    .save_ancillary_file(file, &config.datastream)
                    .await
                    .with_context(|| format!("Failed to archive ancillary file {:?}", file))?;
                println!("   📎 {}", saved.display());
            }

            println!("   Tests applied: {}", result.tests_applied);
            if result.flagged_variables.is_empty() {
                println!("   ✅ No values flagged");
            } else {
                println!(
                    "   ⚠️  Flagged variables: {}",
                    result.flagged_variables.join(", ")
                );
            }
            println!("   💾 Saved to {}", result.saved_to.display());
            println!("\n✨ SUCCESS! Pipeline finished in {:.2?}", start.elapsed());
            Ok(())
        }
        Err(e) => {
            eprintln!("\n💥 QC PIPELINE FAILED");
            eprintln!("{:?}", miette::Report::new(e));
            // Exit with error code for CI/CD
            std::process::exit(1);
        }
    }
}
