use std::path::PathBuf;

use anyhow::{anyhow, Result};
use bundle_core::cache::ScanCache;

use dist_bundler::default_cache_dir;

fn resolve_cache_dir(cache_dir: Option<&str>) -> Result<PathBuf> {
    cache_dir
        .map(PathBuf::from)
        .or_else(default_cache_dir)
        .ok_or_else(|| anyhow!("No cache directory; pass --cache-dir or set HOME/XDG_CACHE_HOME"))
}

/// Print where the scan cache lives and how much it holds.
pub fn cache_info_command(cache_dir: Option<&str>) -> Result<()> {
    let dir = resolve_cache_dir(cache_dir)?;
    let cache = ScanCache::persistent(&dir);
    let stats = cache.stats();
    println!("Cache directory: {}", dir.display());
    println!("Records: {}", stats.records);
    println!("Total size: {} bytes", stats.total_bytes);
    Ok(())
}

/// Remove every persisted scan record.
pub fn cache_clear_command(cache_dir: Option<&str>) -> Result<()> {
    let dir = resolve_cache_dir(cache_dir)?;
    let cache = ScanCache::persistent(&dir);
    let removed = cache.clear()?;
    println!("Removed {removed} record(s) from {}", dir.display());
    Ok(())
}
