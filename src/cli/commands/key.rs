//! Key command - print the store key for an asset and preset

use crate::cache::build_key;
use crate::cli::args::KeyArgs;
use crate::error::{ImgCacheError, ImgCacheResult};
use crate::origin::validate_asset_path;
use crate::preset;

/// Execute the key command
pub fn execute(args: KeyArgs) -> ImgCacheResult<()> {
    println!("{}", key_for(&args.path, &args.preset)?);
    Ok(())
}

fn key_for(path: &str, preset_name: &str) -> ImgCacheResult<String> {
    let path = validate_asset_path(path)?;
    let preset = preset::table()
        .get(preset_name)
        .ok_or_else(|| ImgCacheError::InvalidPreset(preset_name.to_string()))?;

    Ok(build_key(&path, preset.name, preset))
}
