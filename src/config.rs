// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Host configuration: plugin search paths and startup playback order.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use waveloom_core::PlaybackOrder;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(remote = "PlaybackOrder")]
enum PlaybackOrderDef {
    Linear,
    Random,
    Single,
}

fn default_order() -> PlaybackOrder {
    PlaybackOrder::Linear
}

/// Complete host configuration, loaded from `waveloom.toml` if present
/// and overlaid with defaults otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Extra directories to scan for plugin modules, beyond the default
    /// data-directory `plugins/` folder.
    #[serde(default)]
    pub extra_plugin_dirs: Vec<PathBuf>,

    #[serde(default = "default_order", with = "PlaybackOrderDef")]
    pub playback_order: PlaybackOrder,

    /// Output sink plugin id to bind at startup (e.g. `"cpal"`).
    #[serde(default = "default_output_id")]
    pub output_id: String,
}

fn default_output_id() -> String {
    "cpal".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            extra_plugin_dirs: Vec::new(),
            playback_order: PlaybackOrder::Linear,
            output_id: default_output_id(),
        }
    }
}

impl HostConfig {
    /// Loads `path` if it exists, falling back to defaults if it doesn't.
    /// A malformed file is an error (the user asked for something
    /// specific and got it wrong, rather than having nothing to load).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = HostConfig::load(Path::new("/nonexistent/waveloom.toml")).unwrap();
        assert_eq!(cfg.output_id, "cpal");
        assert_eq!(cfg.playback_order, PlaybackOrder::Linear);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = HostConfig {
            extra_plugin_dirs: vec![PathBuf::from("/opt/waveloom/plugins")],
            playback_order: PlaybackOrder::Random,
            output_id: "cpal".into(),
        };
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: HostConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.playback_order, PlaybackOrder::Random);
        assert_eq!(parsed.extra_plugin_dirs, cfg.extra_plugin_dirs);
    }
}
