//! CLI command implementations

pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod vend;
pub mod version;
pub mod worker;

pub use cache::execute as cache;
pub use config::execute as config;
pub use fingerprint::execute as fingerprint;
pub use vend::execute as vend;
pub use version::execute as version;
pub use worker::execute as worker;

use crate::cache::CacheCoordinator;
use crate::config::{Config, ConfigManager};
use crate::error::VendResult;
use crate::store::{FsStore, StoreLayout};
use std::path::PathBuf;
use std::sync::Arc;

/// Filesystem store root from config, or the state directory default
pub(crate) fn store_root(config: &Config) -> PathBuf {
    config
        .store
        .root
        .clone()
        .unwrap_or_else(ConfigManager::default_store_root)
}

/// Open the configured store and a coordinator over it
pub(crate) async fn open_cache(config: &Config) -> VendResult<CacheCoordinator> {
    let store = FsStore::open(store_root(config), config.store.public_url.clone()).await?;
    Ok(CacheCoordinator::new(
        Arc::new(store),
        StoreLayout::new(&config.store.prefix),
        config.build.max_lifetime(),
        config.build.grace(),
    ))
}
