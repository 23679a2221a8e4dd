//! Key generation commands.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use colored::Colorize;
use keyward_core::{KeyPair, MasterDbKey};
use tracing::info;

use crate::utils::key_file_json;

/// Execute the keygen command.
pub fn execute(output: Option<PathBuf>, force: bool, quiet: bool) -> Result<()> {
    let pair = KeyPair::generate();

    match output {
        Some(path) => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let json = serde_json::to_string_pretty(&key_file_json(&pair))
                .context("Failed to serialize keypair")?;
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write key file: {}", path.display()))?;
            info!(path = %path.display(), "Keypair written");

            if quiet {
                println!("{}", BASE64.encode(pair.public_key()));
            } else {
                println!("{} {}", "Keypair written to".green(), path.display());
                println!("   {} {}", "Public key:".dimmed(), BASE64.encode(pair.public_key()));
            }
        }
        None => {
            if quiet {
                println!("{}", key_file_json(&pair));
            } else {
                println!("   {} {}", "Public key: ".dimmed(), BASE64.encode(pair.public_key()));
                println!("   {} {}", "Private key:".dimmed(), BASE64.encode(pair.private_key()));
                println!("   {} {}", "Public hex: ".dimmed(), hex::encode(pair.public_key()));
            }
        }
    }
    Ok(())
}

/// Print a fresh master DB encryption key.
pub fn master_db_key(quiet: bool) -> Result<()> {
    let key = MasterDbKey::generate();
    if quiet {
        println!("{}", key.to_base64());
    } else {
        println!("{}", "Set this as MASTER_DB_ENCRYPTION_KEY:".dimmed());
        println!("{}", key.to_base64());
    }
    Ok(())
}
