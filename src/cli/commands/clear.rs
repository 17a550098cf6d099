//! Clear-cache command - delete every derived image from the store

use crate::config::schema::{Config, StoreBackend};
use crate::error::ImgCacheResult;
use crate::gateway::CacheGateway;
use console::style;

/// Execute the clear-cache command
pub async fn execute(config: &Config) -> ImgCacheResult<()> {
    if config.store.backend == StoreBackend::Memory {
        println!(
            "{} The memory store lives inside the server process; use POST /api/clear-cache instead",
            style("!").yellow()
        );
        return Ok(());
    }

    let gateway = CacheGateway::from_config(config)?;
    let deleted = gateway.clear_cache().await?;

    println!(
        "{} Cleared {} cached object(s) from {}",
        style("✓").green(),
        deleted,
        config.store.root.display()
    );
    Ok(())
}
