//! Offline payload verification.

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use keyward_core::{verify_offline_payload, OfflineKeyIndicator};
use tracing::info;

use crate::utils::decode_base64;

pub fn verify(payload: &Path, public_key: &str, quiet: bool) -> Result<()> {
    let text = std::fs::read_to_string(payload)
        .with_context(|| format!("Failed to read payload file: {}", payload.display()))?;
    let public_key = decode_base64("public_key", public_key)?;

    let Some(indicator) = verify_offline_payload(text.trim_end_matches('\n'), &public_key)
        .context("Invalid offline payload")?
    else {
        bail!("Offline payload signature does not verify");
    };

    let signer = match indicator {
        OfflineKeyIndicator::ApplicationMaster => "application master key",
        OfflineKeyIndicator::ActivationServer => "activation server key",
    };
    info!(signer, "Offline payload verified");

    if quiet {
        println!("{}", indicator.as_char());
    } else {
        println!("{} {}", "VALID".green().bold(), format!("(signed by {})", signer).dimmed());
    }
    Ok(())
}
