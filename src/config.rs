use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::DenominatorPolicy;
use crate::roi::{PropagationPolicy, RoiColor, RoiSize, SyncMode};

const SETTINGS_DIR: &str = "slicecompare";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub service: ServiceSettings,
    pub roi: RoiSettings,
    pub history: HistorySettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8765".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiSettings {
    pub width: i64,
    pub height: i64,
    pub color: RoiColor,
    pub presets: Vec<[i64; 2]>,
    pub propagation: PropagationPolicy,
    pub mode: SyncMode,
}

impl RoiSettings {
    pub fn size(&self) -> RoiSize {
        RoiSize::clamped(self.width, self.height)
    }

    pub fn preset_sizes(&self) -> Vec<RoiSize> {
        let mut sizes: Vec<RoiSize> = Vec::new();
        for [width, height] in &self.presets {
            let size = RoiSize::clamped(*width, *height);
            if !sizes.contains(&size) {
                sizes.push(size);
            }
        }
        sizes
    }
}

impl Default for RoiSettings {
    fn default() -> Self {
        let size = RoiSize::default();
        Self {
            width: size.width.into(),
            height: size.height.into(),
            color: RoiColor::default(),
            presets: vec![[5, 5], [10, 10], [20, 20], [50, 50]],
            propagation: PropagationPolicy::default(),
            mode: SyncMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub denominator: DenominatorPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub default_folder_names: Vec<String>,
    pub transient_notice_ms: u64,
    pub max_columns: usize,
}

impl DisplaySettings {
    pub fn default_folder_name(&self, series: usize) -> Option<&str> {
        self.default_folder_names.get(series).map(String::as_str)
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            default_folder_names: Vec::new(),
            transient_notice_ms: 1000,
            max_columns: 4,
        }
    }
}

impl ViewerConfig {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read `path`. A missing file is not an error and yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text, path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(config) => {
                log::info!("Using settings from {}", path.display());
                config
            }
            Err(err) => {
                log::warn!("{err}; falling back to default settings");
                Self::default()
            }
        }
    }
}

pub fn settings_file_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        return env::var_os("APPDATA")
            .map(PathBuf::from)
            .map(|base| base.join(SETTINGS_DIR).join(SETTINGS_FILE));
    }

    #[cfg(target_os = "macos")]
    {
        return env::var_os("HOME").map(PathBuf::from).map(|home| {
            home.join("Library")
                .join("Application Support")
                .join(SETTINGS_DIR)
                .join(SETTINGS_FILE)
        });
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").filter(|value| !value.is_empty()) {
            return Some(PathBuf::from(xdg).join(SETTINGS_DIR).join(SETTINGS_FILE));
        }
        env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".config").join(SETTINGS_DIR).join(SETTINGS_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = ViewerConfig::load(&dir.path().join("settings.toml")).expect("defaults");
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.service.base_url, "http://127.0.0.1:8765");
        assert_eq!(config.display.max_columns, 4);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "[roi]\nwidth = 500\ncolor = \"#00ff00\"\npropagation = \"checked\"\n\n\
             [history]\ndenominator = \"mean-count\"\n\n\
             [display]\ndefault_folder_names = [\"baseline\", \"follow-up\"]\n",
        )
        .expect("write settings");

        let config = ViewerConfig::load(&path).expect("valid settings");
        assert_eq!(config.roi.size(), RoiSize::clamped(200, 10));
        assert_eq!(config.roi.color, RoiColor::rgb(0, 255, 0));
        assert_eq!(config.roi.propagation, PropagationPolicy::Checked);
        assert_eq!(config.roi.mode, SyncMode::Synchronized);
        assert_eq!(config.history.denominator, DenominatorPolicy::MeanCount);
        assert_eq!(config.display.default_folder_name(1), Some("follow-up"));
        assert_eq!(config.display.default_folder_name(2), None);
        assert_eq!(config.service.request_timeout_secs, 120);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[roi]\ncolor = \"red\"\n").expect("write settings");
        assert!(matches!(
            ViewerConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert_eq!(
            ViewerConfig::load_or_default(Some(&path)),
            ViewerConfig::default()
        );
    }

    #[test]
    fn presets_are_clamped_and_deduplicated() {
        let settings = RoiSettings {
            presets: vec![[1, 1], [3, 3], [10, 10], [999, 10]],
            ..RoiSettings::default()
        };
        assert_eq!(
            settings.preset_sizes(),
            vec![
                RoiSize::clamped(3, 3),
                RoiSize::clamped(10, 10),
                RoiSize::clamped(200, 10)
            ]
        );
    }
}
