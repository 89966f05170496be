//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use pitstop_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, remote_backend, remote_url, remote_key, remote_table, \
                          record_quota_bytes, image_cache_quota_bytes, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "remote_backend": config.remote_backend,
                    "remote_url": config.remote_url,
                    "remote_key": config.remote_key.as_deref().map(mask),
                    "remote_table": config.remote_table,
                    "record_quota_bytes": config.record_quota_bytes,
                    "image_cache_quota_bytes": config.image_cache_quota_bytes,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:                {}", config.data_dir.display());
            println!(
                "  remote_backend:          {}",
                serde_json::to_value(config.remote_backend)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default()
            );
            println!(
                "  remote_url:              {}",
                config.remote_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  remote_key:              {}",
                config
                    .remote_key
                    .as_deref()
                    .map(mask)
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  remote_table:            {}", config.remote_table);
            println!("  record_quota_bytes:      {}", config.record_quota_bytes);
            println!(
                "  image_cache_quota_bytes: {}",
                config
                    .image_cache_quota_bytes
                    .map(|q| q.to_string())
                    .unwrap_or_else(|| "(unlimited)".to_string())
            );
            println!(
                "  log_file:                {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key == "remote_key" { mask(&value) } else { value };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";
    match key {
        "data_dir" => config.data_dir = value.into(),
        "remote_backend" => config.remote_backend = value.parse()?,
        "remote_url" => config.remote_url = (!unset).then(|| value.to_string()),
        "remote_key" => config.remote_key = (!unset).then(|| value.to_string()),
        "remote_table" => {
            if unset {
                bail!("remote_table cannot be empty");
            }
            config.remote_table = value.to_string();
        }
        "record_quota_bytes" => {
            config.record_quota_bytes = value
                .parse()
                .context("Invalid value for record_quota_bytes. Use a byte count.")?;
        }
        "image_cache_quota_bytes" => {
            config.image_cache_quota_bytes = if unset {
                None
            } else {
                Some(
                    value
                        .parse()
                        .context("Invalid value for image_cache_quota_bytes. Use a byte count.")?,
                )
            };
        }
        "log_file" => config.log_file = (!unset).then(|| value.into()),
        _ => bail!(
            "Unknown configuration key: '{}'\nValid keys: {}",
            key,
            VALID_KEYS
        ),
    }
    Ok(())
}

/// Hide all but the last four characters of a secret
fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitstop_core::RemoteBackend;

    #[test]
    fn test_apply_keys() {
        let mut config = Config::default();

        apply(&mut config, "remote_backend", "local").unwrap();
        assert_eq!(config.remote_backend, RemoteBackend::Local);

        apply(&mut config, "remote_url", "https://abc.supabase.co").unwrap();
        assert_eq!(config.remote_url.as_deref(), Some("https://abc.supabase.co"));
        apply(&mut config, "remote_url", "none").unwrap();
        assert!(config.remote_url.is_none());

        apply(&mut config, "image_cache_quota_bytes", "1048576").unwrap();
        assert_eq!(config.image_cache_quota_bytes, Some(1_048_576));
        apply(&mut config, "image_cache_quota_bytes", "").unwrap();
        assert!(config.image_cache_quota_bytes.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply(&mut config, "remote_backend", "firebase").is_err());
        assert!(apply(&mut config, "record_quota_bytes", "lots").is_err());
        assert!(apply(&mut config, "remote_table", "").is_err());
        assert!(apply(&mut config, "favorite_color", "red").is_err());
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("abc"), "****");
        assert_eq!(mask("eyJhbGciOiJIUzI1NiJ9"), "****NiJ9");
    }
}
