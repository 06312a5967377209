// tsflow/src/commands/validate.rs
//
// USE CASE: Dry-run a pipeline configuration.

use std::path::PathBuf;

use tsflow_core::application::validate_config;
use tsflow_core::domain::qc::HandlerRegistry;
use tsflow_core::infrastructure::config::load_pipeline_config;

pub fn execute(config_paths: Vec<PathBuf>) -> anyhow::Result<()> {
    for path in &config_paths {
        println!("✅ Validating {}...", path.display());
    }

    let config = match load_pipeline_config(&config_paths) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            std::process::exit(1);
        }
    };

    let report = validate_config(&config, &HandlerRegistry::with_builtins());
    println!(
        "   Datastream: {} ({} QC tests)",
        report.datastream, report.tests
    );

    if report.is_valid() {
        println!("   ✨ Configuration is valid.");
        return Ok(());
    }

    eprintln!("\n⚠️  {} issue(s) detected:", report.issues.len());
    for issue in &report.issues {
        match &issue.test {
            Some(test) => eprintln!("   ❌ [{}] {}", test, issue.message),
            None => eprintln!("   ❌ {}", issue.message),
        }
    }
    std::process::exit(1);
}
