//! Remote document command handlers

use std::io::{self, IsTerminal, Write};

use anyhow::{Context, Result};

use pitstop_core::{GarageRepository, SaveOutcome};

use crate::output::Output;

/// Delete this user's garage from the remote store
///
/// The local garage is left alone.
pub async fn delete(repo: &GarageRepository, yes: bool, output: &Output) -> Result<()> {
    let user_id = repo.remote_user_id();

    if !yes && output.should_prompt() {
        let prompt = format!("Delete the remote garage for {}?", user_id);
        if !confirm(&prompt)? {
            output.message("Cancelled.");
            return Ok(());
        }
    }

    let outcome = repo
        .remote()
        .remove()
        .await
        .context("Failed to queue remote delete")?;
    match outcome {
        SaveOutcome::Pushed => output.success("Remote garage deleted"),
        SaveOutcome::Queued => output.success("Remote delete queued; it will run on the next sync"),
        SaveOutcome::Skipped => output.warning("Remote sync is not configured; nothing to delete"),
    }
    Ok(())
}

/// Ask for confirmation on an interactive terminal
fn confirm(prompt: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}
