//! UniFi controller backup (`.unf`) decoding
//!
//! Turns an encrypted controller backup into grouped BSON documents and a
//! searchable text projection. Every stage is a plain synchronous function so
//! callers can run them one by one (reporting progress in between) or chain
//! them with [`decode_backup`].

mod archive;
mod cipher;
mod documents;
mod extract;
mod inflate;
mod project;
mod render;

pub mod fixture;

pub use archive::{extract_entry, DEFAULT_ENTRY_NAME, MAX_ENTRY_BYTES};
pub use cipher::{decrypt, CipherKey, BLOCK_SIZE, UNF_IV, UNF_KEY};
pub use documents::{
    decode_documents, group_documents, DecodeMode, DocumentGroup, DocumentGroups, MAX_DEPTH,
    TYPE_FIELD, UNCLASSIFIED,
};
pub use extract::{
    extract_alerts, extract_hostname, find_field, search_fields, select_marker, Alert,
    AlertSummary, HOSTNAME_SENTINEL, MAX_ALERTS,
};
pub use inflate::{gunzip, MAX_INFLATED_BYTES};
pub use project::project_text;
pub use render::{render_document, render_value};

pub use bson::Document;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum UnfError {
    #[error("ciphertext length {len} is not a multiple of the {block}-byte block size")]
    SizeMismatch { len: usize, block: usize },

    #[error("invalid key material: {0}")]
    Key(String),

    #[error("unreadable archive: {0}")]
    UnreadableArchive(String),

    #[error("entry `{0}` not found in archive")]
    EntryNotFound(String),

    #[error("corrupt compressed data: {0}")]
    Decompress(String),

    #[error("document decode failed at offset {offset}: {reason}")]
    Decode { offset: usize, reason: String },

    #[error("truncated document at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

pub type Result<T> = std::result::Result<T, UnfError>;

/// Knobs for [`decode_backup`].
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    pub key: CipherKey,
    pub entry_name: String,
    pub mode: DecodeMode,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            key: CipherKey::appliance_default(),
            entry_name: DEFAULT_ENTRY_NAME.to_string(),
            mode: DecodeMode::Lenient,
        }
    }
}

/// Everything derived from one backup file.
#[derive(Clone, Debug)]
pub struct DecodedBackup {
    pub groups: DocumentGroups,
    pub source_text: String,
    pub hostname: String,
    pub alerts: AlertSummary,
}

/// Runs decrypt -> extract -> inflate -> decode -> project -> extract fields.
pub fn decode_backup(encrypted: &[u8], options: &DecodeOptions) -> Result<DecodedBackup> {
    let archive = decrypt(encrypted, &options.key)?;
    let entry = extract_entry(&archive, &options.entry_name)?;
    let raw = gunzip(&entry)?;
    let documents = decode_documents(&raw, options.mode)?;
    let groups = group_documents(documents);
    debug!(
        documents = groups.total_documents(),
        buckets = groups.len(),
        "decoded backup documents"
    );

    let source_text = project_text(&groups);
    let hostname = extract_hostname(&source_text);
    let alerts = extract_alerts(&source_text);

    Ok(DecodedBackup {
        groups,
        source_text,
        hostname,
        alerts,
    })
}
