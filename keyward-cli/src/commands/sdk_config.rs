//! SDK configuration blob commands.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use colored::Colorize;
use keyward_core::SdkConfiguration;

use crate::utils::decode_base64;

pub fn encode(
    application_key: &str,
    application_secret: &str,
    master_public_key: &str,
    quiet: bool,
) -> Result<()> {
    let config = SdkConfiguration {
        application_key: decode_base64("application_key", application_key)?,
        application_secret: decode_base64("application_secret", application_secret)?,
        master_public_key: decode_base64("master_public_key", master_public_key)?,
    };
    keyward_core::keys::decode_public_key(&config.master_public_key)
        .context("Invalid master public key")?;

    let blob = config.serialize().context("Invalid SDK configuration")?;
    if quiet {
        println!("{}", blob);
    } else {
        println!("{}", "SDK configuration:".dimmed());
        println!("{}", blob);
    }
    Ok(())
}

pub fn decode(blob: &str, quiet: bool) -> Result<()> {
    let config = SdkConfiguration::deserialize(blob).context("Invalid SDK configuration")?;

    if quiet {
        let json = serde_json::json!({
            "application_key": BASE64.encode(&config.application_key),
            "application_secret": BASE64.encode(&config.application_secret),
            "master_public_key": BASE64.encode(&config.master_public_key),
        });
        println!("{}", json);
    } else {
        let rows = [
            ("Application key:   ", &config.application_key),
            ("Application secret:", &config.application_secret),
            ("Master public key: ", &config.master_public_key),
        ];
        for (label, value) in rows {
            println!("   {} {}", label.dimmed(), BASE64.encode(value));
        }
    }
    Ok(())
}
