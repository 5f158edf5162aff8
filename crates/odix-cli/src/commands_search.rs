use odix_core::{EntityKind, OdixConfig};
use odix_storage::SearchParams;

pub(crate) fn cmd_search(
    config: &OdixConfig,
    pattern: &str,
    kind: Option<&str>,
    module: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    if pattern.trim().is_empty() {
        anyhow::bail!("search pattern must not be empty");
    }
    let storage = crate::open_storage(config)?;
    let params = SearchParams {
        pattern: pattern.to_string(),
        kind: kind.map(str::parse::<EntityKind>).transpose()?,
        module: module.map(str::to_string),
        parent_name: None,
        limit: limit.clamp(1, 100),
        offset: 0,
    };
    let page = storage.search(&params)?;

    if page.items.is_empty() {
        println!("No matching items found.");
        return Ok(());
    }
    for entity in &page.items {
        let name = match &entity.parent_name {
            Some(parent) => format!("{parent}.{}", entity.name),
            None => entity.name.clone(),
        };
        println!(
            "  {:<18} {:<24} {}  {}:{}",
            entity.kind.as_str(),
            entity.module,
            name,
            entity.file_path,
            entity.line_number
        );
    }
    println!("Showing {} of {} matches", page.returned(), page.total);
    Ok(())
}

pub(crate) fn cmd_status(config: &OdixConfig) -> anyhow::Result<()> {
    let storage = crate::open_storage(config)?;
    let stats = storage.index_stats()?;

    println!("odix index ({})", config.storage.db_path);
    println!("  Items:         {}", stats.total_items);
    println!("  Modules:       {}", stats.total_modules);
    println!("  Files:         {}", stats.total_files);
    println!(
        "  Relationships: {} ({} unresolved)",
        stats.total_relationships, stats.dangling_relationships
    );
    if !stats.counts_by_kind.is_empty() {
        println!("  By type:");
        for (kind, count) in &stats.counts_by_kind {
            println!("    {kind:<18} {count}");
        }
    }
    Ok(())
}
