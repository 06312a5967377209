// tsflow/src/commands/inspect.rs
//
// USE CASE: Show the QC flags recorded in a stored dataset.

use std::path::PathBuf;

use anyhow::Context;
use comfy_table::Table;
use comfy_table::presets::UTF8_FULL;
use tsflow_core::domain::dataset::{Dataset, QC_PREFIX};
use tsflow_core::infrastructure::fs::load_dataset;

pub fn execute(input: PathBuf, variable: Option<String>) -> anyhow::Result<()> {
    let dataset =
        load_dataset(&input).with_context(|| format!("Failed to load dataset from {:?}", input))?;

    let variables: Vec<String> = match variable {
        Some(name) => {
            let name = parent_name(name);
            if !dataset.contains(&name) {
                anyhow::bail!("❌ Variable '{}' not found in {}", name, input.display());
            }
            vec![name]
        }
        None => dataset
            .non_qc_variable_names()
            .into_iter()
            .filter(|v| !dataset.flag_table(v).is_empty())
            .collect(),
    };

    println!(
        "\n🔍 Inspecting {} ({})",
        input.display(),
        dataset.datastream().unwrap_or("no datastream")
    );
    if variables.is_empty() {
        println!("   No QC flags recorded.");
        return Ok(());
    }

    for name in variables {
        println!("\n{}", render(&dataset, &name));
    }
    Ok(())
}

/// `qc_temp` and `temp` show the same table. Only one prefix is stripped.
fn parent_name(name: String) -> String {
    name.strip_prefix(QC_PREFIX).map(str::to_string).unwrap_or(name)
}

fn render(dataset: &Dataset, variable: &str) -> String {
    let total = dataset.variable(variable).map(|v| v.len()).unwrap_or(0);
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Bit".to_string(),
        "Assessment".to_string(),
        "Meaning".to_string(),
        format!("Failed / {}", total),
    ]);

    for flag in dataset.flag_table(variable) {
        let failed = dataset
            .failed_elements(variable, flag.bit)
            .map(|m| m.failed_count())
            .unwrap_or(0);
        table.add_row(vec![
            flag.bit.to_string(),
            flag.assessment.to_string(),
            flag.meaning,
            failed.to_string(),
        ]);
    }

    format!("{}\n{}", variable, table)
}
