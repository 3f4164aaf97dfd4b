//! ZIP container access

use std::io::{Cursor, Read};

use tracing::{debug, trace};
use zip::ZipArchive;

use crate::{Result, UnfError};

/// Entry holding the gzipped database dump.
pub const DEFAULT_ENTRY_NAME: &str = "db.gz";

/// Upper bound on one extracted entry.
pub const MAX_ENTRY_BYTES: u64 = 1 << 30;

/// Return the payload of the first entry whose name matches `name`
/// (ASCII case-insensitive), walking entries in stored order.
pub fn extract_entry(archive: &[u8], name: &str) -> Result<Vec<u8>> {
    extract_entry_bounded(archive, name, MAX_ENTRY_BYTES)
}

fn extract_entry_bounded(archive: &[u8], name: &str, limit: u64) -> Result<Vec<u8>> {
    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| UnfError::UnreadableArchive(e.to_string()))?;

    debug!(entries = zip.len(), target = name, "archive opened");

    for index in 0..zip.len() {
        let entry = zip
            .by_index(index)
            .map_err(|e| UnfError::UnreadableArchive(format!("entry #{index}: {e}")))?;

        trace!(index, entry = entry.name(), "archive entry");
        if !entry.name().eq_ignore_ascii_case(name) {
            continue;
        }

        // declared sizes come from the central directory and are not trusted
        let entry_name = entry.name().to_string();
        if entry.size() > limit {
            return Err(UnfError::UnreadableArchive(format!(
                "entry `{entry_name}` declares {} bytes, limit is {limit}",
                entry.size()
            )));
        }

        let mut payload = Vec::new();
        entry
            .take(limit + 1)
            .read_to_end(&mut payload)
            .map_err(|e| UnfError::UnreadableArchive(format!("entry `{entry_name}`: {e}")))?;

        if payload.len() as u64 > limit {
            return Err(UnfError::UnreadableArchive(format!(
                "entry `{entry_name}` exceeds {limit} bytes"
            )));
        }
        return Ok(payload);
    }

    Err(UnfError::EntryNotFound(name.to_string()))
}
