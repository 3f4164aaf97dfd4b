use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;
use unf::{decode_backup, CipherKey, DecodeMode, DecodeOptions, DEFAULT_ENTRY_NAME};

#[derive(Parser, Debug)]
#[command(name = "unf-decode", version, about = "Decode a controller .unf backup")]
struct Cli {
    /// Encrypted backup file.
    input: PathBuf,

    /// Archive entry holding the database dump.
    #[arg(long, default_value = DEFAULT_ENTRY_NAME)]
    entry: String,

    /// Fail on a truncated trailing document instead of dropping it.
    #[arg(long)]
    strict: bool,

    /// Print a JSON summary instead of the projected text.
    #[arg(long)]
    json: bool,

    /// Hex key override (requires --iv-hex).
    #[arg(long, requires = "iv_hex")]
    key_hex: Option<String>,

    #[arg(long, requires = "key_hex")]
    iv_hex: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let key = match (&cli.key_hex, &cli.iv_hex) {
        (Some(k), Some(iv)) => CipherKey::from_hex(k, iv)?,
        _ => CipherKey::appliance_default(),
    };
    let options = DecodeOptions {
        key,
        entry_name: cli.entry.clone(),
        mode: if cli.strict {
            DecodeMode::Strict
        } else {
            DecodeMode::Lenient
        },
    };

    let encrypted = std::fs::read(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    info!(path = %cli.input.display(), bytes = encrypted.len(), "decoding backup");

    let decoded = decode_backup(&encrypted, &options)
        .with_context(|| format!("Failed to decode {}", cli.input.display()))?;

    if cli.json {
        let buckets: serde_json::Map<String, serde_json::Value> = decoded
            .groups
            .iter()
            .map(|(name, docs)| (name.to_string(), json!(docs.len())))
            .collect();
        let summary = json!({
            "hostname": decoded.hostname,
            "alerts": decoded.alerts.alerts,
            "remaining_alerts": decoded.alerts.remaining,
            "documents": decoded.groups.total_documents(),
            "buckets": buckets,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", decoded.source_text);
    }

    Ok(())
}
