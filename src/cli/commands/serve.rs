//! Serve command - run the caching HTTP server

use crate::cli::args::ServeArgs;
use crate::config::schema::{Config, OriginKind};
use crate::error::ImgCacheResult;
use crate::server;
use tracing::info;

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: &Config) -> ImgCacheResult<()> {
    let config = apply_overrides(args, config);

    info!(
        bind = %config.server.bind,
        store = ?config.store.backend,
        origin = ?config.origin.kind,
        transformer = %config.transformer.url,
        "starting imgcache"
    );

    server::serve_config(&config).await
}

/// Apply command-line overrides on top of the loaded configuration
fn apply_overrides(args: ServeArgs, config: &Config) -> Config {
    let mut config = config.clone();

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(dir) = args.origin_dir {
        config.origin.kind = OriginKind::Local;
        config.origin.root = dir;
    }
    if let Some(dir) = args.store_dir {
        config.store.root = dir;
    }
    if let Some(url) = args.transformer_url {
        config.transformer.url = url;
    }

    config
}
