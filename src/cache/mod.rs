//! Derived-object caching
//!
//! Derived objects live under the `cached/` prefix of the object store,
//! keyed by asset path, preset name and a digest of the preset body:
//!
//! ```text
//! cached/assets/<asset path>/<preset name>/<32 hex digits>
//! ```
//!
//! Objects are written through a multipart session and become visible only
//! when the session completes, so a reader sees either nothing or the whole
//! object.

pub mod key;
pub mod upload;

pub use key::{build_key, preset_digest, CACHE_PREFIX};
pub use upload::{upload_stream, UploadGuard, MIN_PART_SIZE};
