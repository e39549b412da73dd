//! Process-wide backend settings, chiefly the image data layout.
//!
//! Image tensors are either channels-last, `(height, width, channels)`, or
//! channels-first, `(channels, height, width)`. Architecture builders query
//! [`image_data_format`] to decide input shapes and normalization axes.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use convnet_core::Shape;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{NnError, NnResult};

/// Names a config file to load instead of `~/.convnet/convnet.json`.
pub const CONFIG_ENV: &str = "CONVNET_CONFIG";
/// Overrides the data format from any config file.
pub const DATA_FORMAT_ENV: &str = "CONVNET_IMAGE_DATA_FORMAT";

/// Position of the channel dimension in image tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageDataFormat {
    ChannelsFirst,
    #[default]
    ChannelsLast,
}

impl ImageDataFormat {
    /// Axis normalization layers should operate over: `1` or `-1`.
    pub fn channel_axis(self) -> isize {
        match self {
            ImageDataFormat::ChannelsFirst => 1,
            ImageDataFormat::ChannelsLast => -1,
        }
    }

    /// Per-sample shape of an image with the given dimensions.
    pub fn image_shape(self, height: usize, width: usize, depth: usize) -> Shape {
        match self {
            ImageDataFormat::ChannelsFirst => Shape::new(vec![depth, height, width]),
            ImageDataFormat::ChannelsLast => Shape::new(vec![height, width, depth]),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageDataFormat::ChannelsFirst => "channels_first",
            ImageDataFormat::ChannelsLast => "channels_last",
        }
    }
}

impl fmt::Display for ImageDataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageDataFormat {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "channels_first" => Ok(ImageDataFormat::ChannelsFirst),
            "channels_last" => Ok(ImageDataFormat::ChannelsLast),
            other => Err(NnError::Config(format!(
                "unknown image data format {other:?}, expected channels_first or channels_last"
            ))),
        }
    }
}

/// Backend settings, as stored in `convnet.json`.
///
/// ```json
/// { "image_data_format": "channels_first" }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub image_data_format: ImageDataFormat,
}

impl BackendConfig {
    pub const DEFAULT: BackendConfig = BackendConfig {
        image_data_format: ImageDataFormat::ChannelsLast,
    };

    pub fn from_json_str(json: &str) -> NnResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> NnResult<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> NnResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `~/.convnet/convnet.json`, when a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        env::var_os("HOME").map(|home| PathBuf::from(home).join(".convnet").join("convnet.json"))
    }

    /// Load from the environment: `CONVNET_CONFIG`, then the default path,
    /// then `CONVNET_IMAGE_DATA_FORMAT` on top.
    pub fn load() -> NnResult<Self> {
        let explicit = env::var_os(CONFIG_ENV).map(PathBuf::from);
        let format = env::var(DATA_FORMAT_ENV).ok();
        Self::load_from(explicit.as_deref(), Self::default_path().as_deref(), format.as_deref())
    }

    /// Resolve a config from an explicit file, a fallback file and a format override.
    ///
    /// An explicit file must exist and parse. A broken fallback file is
    /// ignored with a warning.
    pub fn load_from(
        explicit: Option<&Path>,
        fallback: Option<&Path>,
        format_override: Option<&str>,
    ) -> NnResult<Self> {
        let mut config = match (explicit, fallback) {
            (Some(path), _) => {
                debug!("loading backend config from {}", path.display());
                Self::from_file(path)?
            }
            (None, Some(path)) if path.exists() => match Self::from_file(path) {
                Ok(config) => config,
                Err(err) => {
                    warn!("ignoring backend config {}: {}", path.display(), err);
                    Self::DEFAULT
                }
            },
            _ => Self::DEFAULT,
        };

        if let Some(format) = format_override {
            config.image_data_format = format.parse()?;
        }
        Ok(config)
    }
}

static BACKEND: RwLock<BackendConfig> = RwLock::new(BackendConfig::DEFAULT);

/// The current process-wide backend config.
pub fn config() -> BackendConfig {
    *BACKEND.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn set_config(config: BackendConfig) {
    *BACKEND.write().unwrap_or_else(PoisonError::into_inner) = config;
}

/// The configured data layout for image tensors.
pub fn image_data_format() -> ImageDataFormat {
    config().image_data_format
}

pub fn set_image_data_format(format: ImageDataFormat) {
    BACKEND
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .image_data_format = format;
}
