//! Keyward CLI - key material, SDK configuration and signature test vectors.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use keyward_core::{SignatureFormat, SignatureType};

mod commands;
mod exit_codes;
mod utils;

const EXIT_CODES_HELP: &str = "Exit codes:
  0   Success
  1   General error
  64  Usage error
  65  Invalid data (malformed blob, bad key, signature mismatch)
  66  Cannot open input file
  74  Cannot write output file";

#[derive(Parser)]
#[command(name = "keyward")]
#[command(
    author,
    version,
    about = "Activation key material and protocol test vectors",
    long_about = None
)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Print only the essential value
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a P-256 keypair
    Keygen {
        /// Write the keypair as JSON to this file instead of printing it
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,
    },

    /// Generate a master DB encryption key (base64)
    MasterDbKey,

    /// Encode or decode SDK configuration blobs
    SdkConfig {
        #[command(subcommand)]
        action: SdkConfigAction,
    },

    /// Compute a client signature for a request (device side)
    Sign {
        /// Device keypair file written by `keygen --output`
        #[arg(long, value_name = "FILE")]
        key_file: PathBuf,

        /// Server public key of the activation (base64)
        #[arg(long)]
        server_public_key: String,

        /// Signature type, e.g. POSSESSION_KNOWLEDGE
        #[arg(long = "type", value_parser = parse_signature_type)]
        signature_type: SignatureType,

        /// Counter value to sign at
        #[arg(long)]
        counter: u64,

        /// Normalized request data
        #[arg(long)]
        data: String,

        /// Application secret (base64 string as issued), or `offline`
        #[arg(long)]
        application_secret: String,

        #[arg(long, value_enum, default_value_t = FormatArg::Base64)]
        format: FormatArg,
    },

    /// Check an offline payload against a server public key
    VerifyOffline {
        /// File holding the offline payload text
        #[arg(value_name = "PAYLOAD")]
        payload: PathBuf,

        /// Activation server key or application master key (base64)
        #[arg(long)]
        public_key: String,
    },
}

#[derive(Subcommand)]
enum SdkConfigAction {
    /// Build a blob from its parts
    Encode {
        /// Application key (base64, 16 bytes)
        #[arg(long)]
        application_key: String,

        /// Application secret (base64, 16 bytes)
        #[arg(long)]
        application_secret: String,

        /// Application master public key (base64)
        #[arg(long)]
        master_public_key: String,
    },

    /// Print the parts of a blob
    Decode {
        #[arg(value_name = "BLOB")]
        blob: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Decimal,
    Base64,
}

impl From<FormatArg> for SignatureFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Decimal => SignatureFormat::Decimal,
            FormatArg::Base64 => SignatureFormat::Base64,
        }
    }
}

fn parse_signature_type(value: &str) -> Result<SignatureType, String> {
    value.parse().map_err(|e: keyward_core::KeywardError| e.to_string())
}

fn run(cli: Cli) -> Result<()> {
    let quiet = cli.quiet;
    match cli.command {
        Commands::Keygen { output, force } => commands::keygen::execute(output, force, quiet),
        Commands::MasterDbKey => commands::keygen::master_db_key(quiet),
        Commands::SdkConfig { action } => match action {
            SdkConfigAction::Encode {
                application_key,
                application_secret,
                master_public_key,
            } => commands::sdk_config::encode(
                &application_key,
                &application_secret,
                &master_public_key,
                quiet,
            ),
            SdkConfigAction::Decode { blob } => commands::sdk_config::decode(&blob, quiet),
        },
        Commands::Sign {
            key_file,
            server_public_key,
            signature_type,
            counter,
            data,
            application_secret,
            format,
        } => commands::sign::execute(commands::sign::SignArgs {
            key_file,
            server_public_key,
            signature_type,
            counter,
            data,
            application_secret,
            format: format.into(),
            quiet,
        }),
        Commands::VerifyOffline {
            payload,
            public_key,
        } => commands::offline::verify(&payload, &public_key, quiet),
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "keyward=debug,keyward_core=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => std::process::ExitCode::from(exit_codes::SUCCESS),
        Err(err) => {
            let exit = exit_codes::ExitCode::from_anyhow(&err);
            if let Some(message) = &exit.message {
                eprintln!("{} {}", "error:".red().bold(), message);
            }
            std::process::ExitCode::from(exit.code)
        }
    }
}
