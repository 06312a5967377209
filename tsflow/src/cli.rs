// tsflow/src/cli.rs
//
// Single source of truth for all CLI definitions (Clap structs).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tsflow")]
#[command(about = "Quality control and storage for time-series datastreams", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 🚀 Runs the QC pipeline on a dataset and stores the result
    Run {
        /// Pipeline configuration (YAML); repeat to layer files, later ones win
        #[arg(long, short, env = "TSFLOW_CONFIG", required = true)]
        config: Vec<PathBuf>,

        /// Input dataset (JSON)
        #[arg(long, short)]
        input: PathBuf,

        /// Overrides storage.root from the config
        #[arg(long)]
        storage_root: Option<PathBuf>,

        /// Side files to archive next to the datastream
        #[arg(long)]
        ancillary: Vec<PathBuf>,
    },

    /// ✅ Checks a pipeline configuration without touching any data
    Validate {
        /// Pipeline configuration (YAML); repeat to layer files, later ones win
        #[arg(long, short, env = "TSFLOW_CONFIG", required = true)]
        config: Vec<PathBuf>,
    },

    /// 🔍 Shows the QC flags recorded in a dataset
    Inspect {
        /// Dataset (JSON)
        #[arg(long, short)]
        input: PathBuf,

        /// Only this variable
        #[arg(long, short)]
        variable: Option<String>,
    },

    /// 🧩 Lists the registered operators and error handlers
    Handlers,
}
