use odix_core::OdixConfig;
use odix_index::{Orchestrator, RunCoordinator, RunParams};
use std::sync::Arc;

pub(crate) fn cmd_index(
    config: &OdixConfig,
    full: bool,
    modules: Vec<String>,
    clear: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    let root = config.codebase_root()?;
    let storage = crate::open_storage(config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let orchestrator = Orchestrator::new(Arc::clone(&storage), root, config.indexing.clone());
    let coordinator = RunCoordinator::new(orchestrator, rt.handle().clone());

    let params = RunParams {
        incremental: !full,
        modules: (!modules.is_empty()).then_some(modules),
        clear_all: clear,
    };

    println!("Indexing {}...", root.display());
    let report = rt.block_on(coordinator.run_to_completion(params))?;

    if report.noop {
        println!("  Index is up to date ({} files unchanged)", report.files_unchanged);
        return Ok(());
    }
    println!("  Files scanned:    {}", report.files_scanned);
    println!("  New:              {}", report.files_new);
    println!("  Modified:         {}", report.files_modified);
    println!("  Deleted:          {}", report.files_deleted);
    println!("  Unchanged:        {}", report.files_unchanged);
    println!("  Files indexed:    {}", report.files_indexed);
    println!("  Entities:         {}", report.entities_written);
    println!(
        "  Relationships:    {} ({} unresolved)",
        report.relationships_written, report.relationships_dangling
    );
    if report.relationships_resolved_later > 0 {
        println!("  Resolved later:   {}", report.relationships_resolved_later);
    }
    println!("  Duration:         {} ms", report.duration_ms);

    if !report.failures.is_empty() {
        println!("  Failed files:     {}", report.failures.len());
        for failure in &report.failures {
            println!("    {} [{}]: {}", failure.file_path, failure.code, failure.message);
        }
    }
    Ok(())
}
