//! Cache key derivation
//!
//! A cache key names one (asset, preset) slot in the object store. The key
//! embeds a digest of the canonical preset body so that changing a preset
//! definition moves its derived objects to a fresh slot.

use crate::preset::Preset;
use sha2::{Digest, Sha256};

/// Namespace prefix shared by every derived object
pub const CACHE_PREFIX: &str = "cached/";

/// Number of digest bytes kept in the key (32 hex characters)
const DIGEST_BYTES: usize = 16;

/// Hash the canonical preset body, returning the first 16 bytes as hex
pub fn preset_digest(preset: &Preset) -> String {
    let mut hasher = Sha256::new();
    hasher.update(preset.canonical_body().as_bytes());
    let result = hasher.finalize();

    hex::encode(&result[..DIGEST_BYTES])
}

/// Build the store key for an asset rendered with a preset
///
/// Leading slashes on the asset path are ignored, so `/a.png` and `a.png`
/// share a slot.
pub fn build_key(asset_path: &str, preset_name: &str, preset: &Preset) -> String {
    format!(
        "{}assets/{}/{}/{}",
        CACHE_PREFIX,
        asset_path.trim_start_matches('/'),
        preset_name,
        preset_digest(preset)
    )
}
