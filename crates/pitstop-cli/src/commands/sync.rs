//! Sync command handler

use anyhow::{bail, Context, Result};

use pitstop_core::sync::{DrainOutcome, SkipReason};
use pitstop_core::GarageRepository;

use crate::output::Output;

/// Replay queued writes against the remote store
pub async fn sync(repo: &GarageRepository, output: &Output) -> Result<()> {
    let client = repo.remote();

    if let Err(e) = client.init() {
        bail!(
            "Remote sync unavailable: {}\n\
             Configure it with:\n  \
             pitstop config set remote_backend supabase\n  \
             pitstop config set remote_url https://your-project.supabase.co\n  \
             pitstop config set remote_key your-anon-key",
            e
        );
    }

    let pending = client
        .pending_count()
        .context("Could not read the write queue")?;
    if pending > 0 {
        output.message(&format!(
            "Replaying {} queued change(s) to {}...",
            pending,
            client.backend_name().unwrap_or("remote")
        ));
    }

    match client.drain_queue().await {
        DrainOutcome::Empty => output.success("Sync complete - nothing pending"),
        DrainOutcome::Completed { replayed } => {
            output.success(&format!("Sync complete - {} change(s) sent", replayed))
        }
        DrainOutcome::Skipped(SkipReason::Offline) => {
            bail!("Offline - {} change(s) still queued", pending)
        }
        DrainOutcome::Skipped(SkipReason::AlreadyRunning) => {
            output.message("A sync is already running")
        }
        DrainOutcome::Skipped(SkipReason::NotConfigured) => {
            bail!("Remote sync is not configured")
        }
        DrainOutcome::RetryScheduled { replayed, .. } => {
            let left = client.pending_count().unwrap_or(pending.saturating_sub(replayed));
            bail!(
                "Sync failed after {} change(s) - {} still queued",
                replayed,
                left
            )
        }
        DrainOutcome::Failed => bail!("Could not read the write queue"),
    }

    Ok(())
}
