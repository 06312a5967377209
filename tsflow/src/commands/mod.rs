// tsflow/src/commands/mod.rs

pub mod handlers;
pub mod inspect;
pub mod run;
pub mod validate;
