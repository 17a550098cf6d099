//! imgcache - Edge cache for preset-transformed images
//!
//! Serves original assets from an origin and, for requests naming a preset,
//! derived images produced by an external transform service. Derived images
//! are written once to an object store through multipart uploads and served
//! from there afterwards.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod origin;
pub mod preset;
pub mod server;
pub mod store;
pub mod transform;

pub use error::{ImgCacheError, ImgCacheResult};
pub use gateway::{AssetResponse, CacheGateway, CacheStatus};
