//! Status command handler

use anyhow::Result;

use pitstop_core::{AppContext, GarageRepository, SyncState};

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(ctx: &AppContext, repo: &GarageRepository, output: &Output) -> Result<()> {
    let config = ctx.config();
    let client = repo.remote();
    let garage = repo.load_local();
    let pending = client.pending_count().ok();
    let online = ctx.connectivity().is_online();
    let backend = client.backend_name();
    let state = describe_state(client.state());

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "user_id": client.user_id(),
                    "remote": {
                        "backend": backend,
                        "online": online,
                        "pending": pending,
                        "state": state
                    },
                    "storage": {
                        "data_dir": config.data_dir,
                        "image_cache_enabled": repo.cache().is_enabled(),
                        "cached_images": repo.cache().len()
                    },
                    "counts": {
                        "cars": garage.len()
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            match pending {
                Some(count) => println!("{}", count),
                None => println!("unknown"),
            }
        }
        OutputFormat::Human => {
            println!("Pitstop Status");
            println!("==============");
            println!();
            println!("User ID: {}", client.user_id());
            println!();
            println!("Remote:");
            println!("  Backend: {}", backend.unwrap_or("(not configured)"));
            println!("  Network: {}", if online { "online" } else { "offline" });
            println!("  Pending: {}", describe_pending(pending));
            println!("  State:   {}", state);
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            if repo.cache().is_enabled() {
                println!("  Images:   {} cached", repo.cache().len());
            } else {
                println!("  Images:   cache unavailable");
            }
            println!();
            println!("Contents:");
            println!("  Cars: {}", garage.len());
        }
    }

    Ok(())
}

/// Queue length for display; an unreadable queue is not shown as empty
fn describe_pending(pending: Option<usize>) -> String {
    match pending {
        Some(count) => format!("{} change(s)", count),
        None => "unknown (write queue unreadable)".to_string(),
    }
}

fn describe_state(state: SyncState) -> String {
    match state {
        SyncState::Idle => "idle".to_string(),
        SyncState::Draining => "syncing".to_string(),
        SyncState::ScheduledRetry { attempt, delay } => {
            format!("retry #{} in {}s", attempt, delay.as_secs())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_describe_pending() {
        assert_eq!(describe_pending(Some(2)), "2 change(s)");
        assert!(describe_pending(None).starts_with("unknown"));
    }

    #[test]
    fn test_describe_state() {
        assert_eq!(describe_state(SyncState::Idle), "idle");
        assert_eq!(
            describe_state(SyncState::ScheduledRetry {
                attempt: 2,
                delay: Duration::from_secs(4)
            }),
            "retry #2 in 4s"
        );
    }
}
