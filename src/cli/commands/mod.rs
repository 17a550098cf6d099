//! CLI command implementations

pub mod clear;
pub mod config;
pub mod key;
pub mod presets;
pub mod serve;

pub use clear::execute as clear_cache;
pub use config::execute as config;
pub use key::execute as key;
pub use presets::execute as presets;
pub use serve::execute as serve;
