// tsflow-core/src/lib.rs

// 1. Documentation
#![allow(missing_docs)]

// 2. Memory safety
#![deny(unsafe_code)]
// 3. Robustness
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
// 4. Performance
#![warn(clippy::perf)]

// --- HEXAGONAL MODULES ---

// 1. Ports (Interfaces / Traits)
// Contracts the core needs from the outside world (Storage).
pub mod ports;

// 2. Domain (business core)
// Datasets, flags, QC tests, handler registry, checker and engine.
// Depends on nothing else (neither infra nor app).
pub mod domain;

// 3. Infrastructure (Adapters)
// Config files, file-system storage, atomic writes.
// Depends on Domain and Ports.
pub mod infrastructure;

// 4. Application (Use Cases)
// Pipeline driver and config validation.
// Depends on Domain, Infra and Ports.
pub mod application;

// --- GLOBAL ERROR HANDLING ---
pub mod error;

// --- RE-EXPORTS (FACADE) ---
// use tsflow_core::TsflowError;
pub use error::TsflowError;
