use odix_core::OdixConfig;
use odix_index::{Orchestrator, RunCoordinator};
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn cmd_serve(config: &OdixConfig) -> anyhow::Result<()> {
    config.validate()?;
    let storage = crate::open_storage(config)?;

    // Background runs execute on this runtime; requests are served on the
    // main thread.
    let rt = tokio::runtime::Runtime::new()?;
    let orchestrator = Orchestrator::new(
        Arc::clone(&storage),
        config.codebase_root()?,
        config.indexing.clone(),
    );
    let coordinator = RunCoordinator::new(orchestrator, rt.handle().clone());
    coordinator.ensure_initial_index()?;

    let server = odix_mcp::McpServer::new(storage, coordinator);
    tracing::info!(
        "odix MCP server ready (stdio mode, db: {})",
        config.storage.db_path
    );
    server.run()?;

    rt.shutdown_timeout(Duration::from_secs(5));
    Ok(())
}
