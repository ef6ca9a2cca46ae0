//! Stable plan fingerprints.

use serde::Serialize;

use crate::error::Result;

/// blake3 over the JSON encoding of `value`, hex encoded.
pub fn plan_fingerprint<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// First `len` hex digits of the fingerprint, for display.
pub fn short_fingerprint<T: Serialize>(value: &T, len: usize) -> Result<String> {
    let mut full = plan_fingerprint(value)?;
    full.truncate(len);
    Ok(full)
}
