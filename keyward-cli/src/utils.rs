//! Common utility functions shared across CLI commands.

use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keyward_core::KeyPair;
use tracing::debug;

/// Decode a base64 argument, naming it in the error.
pub fn decode_base64(name: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value.trim())
        .with_context(|| format!("Invalid base64 in {}", name))
}

/// Keypair file contents: `{"public_key": "<b64>", "private_key": "<b64>"}`.
pub fn key_file_json(pair: &KeyPair) -> serde_json::Value {
    serde_json::json!({
        "public_key": BASE64.encode(pair.public_key()),
        "private_key": BASE64.encode(pair.private_key()),
    })
}

/// Load a keypair file written by `keygen --output`.
pub fn load_key_file(path: &Path) -> Result<KeyPair> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read key file: {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_slice(&bytes).context("Invalid key file: not JSON")?;

    let Some(private_key) = json.get("private_key").and_then(|v| v.as_str()) else {
        bail!("Invalid key file: missing private_key");
    };
    let pair = KeyPair::from_private_key(&decode_base64("private_key", private_key)?)?;
    debug!(path = %path.display(), "Loaded keypair");
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        let pair = KeyPair::generate();
        std::fs::write(&path, key_file_json(&pair).to_string()).unwrap();

        let loaded = load_key_file(&path).unwrap();
        assert_eq!(loaded.public_key(), pair.public_key());
    }

    #[test]
    fn test_decode_base64_names_argument() {
        let err = decode_base64("master_public_key", "***").unwrap_err();
        assert!(format!("{err:#}").contains("master_public_key"));
    }
}
