//! Transform presets and query resolution
//!
//! Presets are a fixed table built once per process. Requests select a
//! preset by name with the `p` query parameter; they can never describe a
//! transform directly.

use crate::error::{ImgCacheError, ImgCacheResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

/// Query parameter that selects a preset
pub const PRESET_PARAM: &str = "p";

/// Output quality used when a preset does not set one
pub const DEFAULT_QUALITY: u8 = 85;

/// How the image is fitted into the target box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    Contain,
    Cover,
    Fill,
    Inside,
    Outside,
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Contain => "contain",
            Self::Cover => "cover",
            Self::Fill => "fill",
            Self::Inside => "inside",
            Self::Outside => "outside",
        };
        write!(f, "{}", name)
    }
}

/// Encoded output format, serialized as its mime type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    #[serde(rename = "image/webp")]
    Webp,
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
}

impl ImageFormat {
    /// Content-Type of the encoded output
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Webp => "image/webp",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// Resize geometry
///
/// Field order is alphabetical so that serializing with `serde_json`
/// yields the same canonical form as a sorted-key encoder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResizeSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

/// Output encoding options
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputSpec {
    pub format: ImageFormat,
    #[serde(default = "default_quality")]
    pub quality: u8,
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

/// A named transform + output configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Preset {
    /// Table name; not part of the serialized body
    #[serde(skip)]
    pub name: &'static str,
    pub output: OutputSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<ResizeSpec>,
}

impl Preset {
    fn webp(name: &'static str, square: Option<u32>) -> Self {
        Self {
            name,
            output: OutputSpec {
                format: ImageFormat::Webp,
                quality: DEFAULT_QUALITY,
            },
            transform: square.map(|side| ResizeSpec {
                fit: Some(FitMode::Contain),
                height: Some(side),
                width: Some(side),
            }),
        }
    }

    /// Canonical JSON body with a stable key order
    ///
    /// This is both the payload sent to the transformer and the input of the
    /// cache key digest.
    pub fn canonical_body(&self) -> String {
        // Plain structs with string keys cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Mime type the transformer is asked to produce
    pub fn content_type(&self) -> &'static str {
        self.output.format.content_type()
    }
}

/// Read-only mapping from preset name to preset
#[derive(Debug)]
pub struct PresetTable {
    presets: BTreeMap<&'static str, Preset>,
}

impl PresetTable {
    fn builtin() -> Self {
        let presets = [
            Preset::webp("webp", None),
            Preset::webp("thumb60", Some(60)),
            Preset::webp("thumb160", Some(160)),
            Preset::webp("thumb400", Some(400)),
            Preset::webp("2k", Some(2000)),
        ]
        .into_iter()
        .map(|preset| (preset.name, preset))
        .collect();

        Self { presets }
    }

    /// Look up a preset by name
    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    /// All preset names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.presets.keys().copied()
    }

    /// All presets in name order
    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.values()
    }

    /// Resolve the preset selected by request query parameters
    ///
    /// Returns `Ok(None)` when no selector is present, meaning the request
    /// is a passthrough. An unknown selector is rejected.
    pub fn resolve(&self, params: &HashMap<String, String>) -> ImgCacheResult<Option<&Preset>> {
        let Some(name) = params.get(PRESET_PARAM) else {
            return Ok(None);
        };

        self.get(name)
            .map(Some)
            .ok_or_else(|| ImgCacheError::InvalidPreset(name.clone()))
    }
}

static PRESETS: LazyLock<PresetTable> = LazyLock::new(PresetTable::builtin);

/// The process-wide preset table
pub fn table() -> &'static PresetTable {
    &PRESETS
}

/// Resolve a preset from query parameters against the process-wide table
pub fn resolve(params: &HashMap<String, String>) -> ImgCacheResult<Option<&'static Preset>> {
    table().resolve(params)
}
