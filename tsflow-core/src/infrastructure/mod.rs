// tsflow-core/src/infrastructure/mod.rs

pub mod config;
pub mod error;
pub mod fs;
pub mod storage;

pub use storage::FileSystemStorage;
