//! User id command handlers

use anyhow::{bail, Context, Result};

use pitstop_core::GarageRepository;

use crate::output::{Output, OutputFormat};

/// Show the id this device syncs under
pub fn show(repo: &GarageRepository, output: &Output) -> Result<()> {
    let user_id = repo.remote_user_id();
    match output.format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "user_id": user_id })),
        OutputFormat::Quiet => println!("{}", user_id),
        OutputFormat::Human => {
            println!("User ID: {}", user_id);
            println!();
            println!("Use this ID on another device to share the same garage:");
            println!("  pitstop user set {}", user_id);
        }
    }
    Ok(())
}

/// Switch to another user id
///
/// The local garage is kept; the next `pitstop list` pulls the garage
/// stored under the new id, if there is one.
pub fn set(repo: &GarageRepository, user_id: String, output: &Output) -> Result<()> {
    let accepted = repo
        .set_remote_user_id(&user_id)
        .context("Failed to save user id")?;
    if !accepted {
        bail!("User id cannot be empty");
    }
    output.success(&format!("User id set to {}", user_id.trim()));
    Ok(())
}
