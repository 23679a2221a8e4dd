//! Device-side signature computation.
//!
//! Produces the signature a client SDK would send, which makes it easy to
//! build test vectors against a running server.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use keyward_core::{
    compute_signature, salted_data, HkdfKeyDerivation, KeyDerivation, SignatureFormat,
    SignatureType,
};
use tracing::debug;

use crate::utils::{decode_base64, load_key_file};

pub struct SignArgs {
    pub key_file: PathBuf,
    pub server_public_key: String,
    pub signature_type: SignatureType,
    pub counter: u64,
    pub data: String,
    pub application_secret: String,
    pub format: SignatureFormat,
    pub quiet: bool,
}

/// Execute the sign command.
pub fn execute(args: SignArgs) -> Result<()> {
    let device = load_key_file(&args.key_file)?;
    let server_public_key = decode_base64("server_public_key", &args.server_public_key)?;

    let kdf = HkdfKeyDerivation;
    let master = kdf
        .derive_master_secret(device.private_key(), &server_public_key)
        .context("Invalid key material for the exchange")?;
    let keys = kdf.derive_signature_keys(&master, args.signature_type)?;

    let data = salted_data(args.data.as_bytes(), &args.application_secret);
    let signature = compute_signature(&keys, &data, args.counter, args.format)?;
    debug!(counter = args.counter, signature_type = %args.signature_type, "Signature computed");

    if args.quiet {
        println!("{}", signature);
    } else {
        println!("   {} {}", "Type:     ".dimmed(), args.signature_type);
        println!("   {} {}", "Counter:  ".dimmed(), args.counter);
        println!("   {} {}", "Signature:".dimmed(), signature.bold());
    }
    Ok(())
}
