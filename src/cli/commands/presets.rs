//! Presets command - list the built-in presets

use crate::cache::preset_digest;
use crate::cli::args::{OutputFormat, PresetsArgs};
use crate::error::ImgCacheResult;
use crate::preset::{self, Preset};
use console::style;

/// Execute the presets command
pub fn execute(args: PresetsArgs) -> ImgCacheResult<()> {
    let presets: Vec<&Preset> = preset::table().iter().collect();

    match args.format {
        OutputFormat::Table => print_table(&presets),
        OutputFormat::Json => print_json(&presets)?,
        OutputFormat::Plain => print_plain(&presets),
    }

    Ok(())
}

fn resize_label(preset: &Preset) -> String {
    match &preset.transform {
        Some(resize) => {
            let dim = |v: Option<u32>| v.map_or_else(|| "auto".to_string(), |v| v.to_string());
            let fit = resize
                .fit
                .map_or_else(|| "-".to_string(), |fit| fit.to_string());
            format!("{}x{} {}", dim(resize.width), dim(resize.height), fit)
        }
        None => "-".to_string(),
    }
}

fn print_table(presets: &[&Preset]) {
    println!(
        "{:<10} {:<12} {:<8} {:<20} {:<32}",
        style("NAME").bold(),
        style("FORMAT").bold(),
        style("QUALITY").bold(),
        style("RESIZE").bold(),
        style("DIGEST").bold()
    );
    println!("{}", "-".repeat(86));

    for preset in presets {
        println!(
            "{:<10} {:<12} {:<8} {:<20} {:<32}",
            style(preset.name).cyan(),
            preset.content_type(),
            preset.output.quality,
            resize_label(preset),
            preset_digest(preset)
        );
    }
}

fn print_json(presets: &[&Preset]) -> ImgCacheResult<()> {
    let entries: Vec<serde_json::Value> = presets
        .iter()
        .map(|preset| {
            serde_json::json!({
                "name": preset.name,
                "body": preset,
                "digest": preset_digest(preset),
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn print_plain(presets: &[&Preset]) {
    for preset in presets {
        println!("{}", preset.name);
    }
}
