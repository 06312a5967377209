pub mod pipeline;

pub use pipeline::{
    PipelineConfig, StorageConfig, apply_env_overrides, load_pipeline_config,
    parse_pipeline_config, validate_pipeline_config,
};
