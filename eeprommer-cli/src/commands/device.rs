//! Unlock and version command implementations.

use anyhow::{Context, Result};
use console::style;
use eeprommer::FirmwareVersion;

use crate::config::Config;
use crate::{Cli, open_programmer};

/// Unlock command implementation.
pub(crate) fn cmd_unlock(cli: &Cli, config: &Config) -> Result<()> {
    let mut programmer = open_programmer(cli, config)?;
    programmer
        .unlock()
        .context("Unlock failed")?;

    if !cli.quiet {
        eprintln!(
            "{} Software data protection disabled",
            style("✓").green()
        );
    }
    Ok(())
}

/// Version command implementation. The version goes to stdout.
pub(crate) fn cmd_version(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut programmer = open_programmer(cli, config)?;
    let version = programmer
        .version()
        .context("Version query failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&version_json(&version)).unwrap_or_default()
        );
    } else {
        println!("{version} ({})", hex_bytes(&version));
    }
    Ok(())
}

fn hex_bytes(version: &FirmwareVersion) -> String {
    version
        .as_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn version_json(version: &FirmwareVersion) -> serde_json::Value {
    serde_json::json!({
        "version": version.to_string(),
        "raw": version.as_bytes(),
        "hex": hex_bytes(version),
    })
}
