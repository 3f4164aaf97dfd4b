use std::io::Read;

use flate2::read::MultiGzDecoder;

use crate::{Result, UnfError};

/// Upper bound on the inflated database dump.
pub const MAX_INFLATED_BYTES: u64 = 1 << 30;

/// Inflate a gzip stream (one or more members) to its end.
pub fn gunzip(compressed: &[u8]) -> Result<Vec<u8>> {
    gunzip_bounded(compressed, MAX_INFLATED_BYTES)
}

fn gunzip_bounded(compressed: &[u8], limit: u64) -> Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(compressed).take(limit + 1);
    let mut out = Vec::new();

    decoder
        .read_to_end(&mut out)
        .map_err(|e| UnfError::Decompress(e.to_string()))?;

    if out.len() as u64 > limit {
        return Err(UnfError::Decompress(format!(
            "inflated size exceeds {limit} bytes"
        )));
    }

    Ok(out)
}
