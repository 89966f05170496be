//! Image cache command handlers

use anyhow::Result;

use pitstop_core::GarageRepository;

use crate::output::Output;

/// Evict the oldest cached images
///
/// Photos still referenced by the garage can be evicted too; they come back
/// only from the remote copy.
pub fn prune(repo: &GarageRepository, output: &Output) -> Result<()> {
    let cache = repo.cache();
    if !cache.is_enabled() {
        output.warning("Image cache is unavailable on this device");
        return Ok(());
    }

    let removed = cache.prune();
    output.success(&format!(
        "Removed {} cached image(s), {} left",
        removed,
        cache.len()
    ));
    Ok(())
}
