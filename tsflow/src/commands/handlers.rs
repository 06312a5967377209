// tsflow/src/commands/handlers.rs
//
// USE CASE: List what a pipeline config can reference.

use tsflow_core::domain::qc::HandlerRegistry;

pub fn execute() -> anyhow::Result<()> {
    let registry = HandlerRegistry::with_builtins();
    for (kind, references) in registry.catalog() {
        println!("{}:", kind);
        for reference in references {
            println!("   {}", reference);
        }
    }
    Ok(())
}
