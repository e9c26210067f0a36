use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use serde::{Deserialize, Serialize};
use toml::map::Entry;
use tracing::warn;

/// Overrides [`Config::render_card`].
pub const RENDER_CARD_ENV: &str = "NC_RENDER_CARD";
/// Path of the configuration file, `nc_config.toml` when unset.
pub const CONFIG_PATH_ENV: &str = "NC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "nc_config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DRM node the output is driven on.
    pub render_card: PathBuf,
    /// Wayland socket name, picked automatically when unset.
    pub socket_name: Option<String>,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Color behind client content and of the initial blank frame.
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Surfaces a client may hold at once before creation fails with
    /// `no_memory`.
    pub max_surfaces: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_surfaces: 16 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            render_card: PathBuf::from("/dev/dri/card0"),
            socket_name: None,
            log_filter: "info".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            limits: LimitsConfig::default(),
        }
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn with<R>(f: impl FnOnce(&Config) -> R) -> R {
        let config = CONFIG.get_or_init(Config::init);
        f(config)
    }

    fn init() -> Self {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load(&path, std::env::var_os(RENDER_CARD_ENV))
    }

    /// Defaults, overlaid with the file at `path` if it exists and parses,
    /// then with the render card override.
    pub fn load(path: &Path, render_card: Option<OsString>) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content).unwrap_or_else(|err| {
                warn!("Failed to parse {}: {err}", path.display());
                Self::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(source) => {
                let err = ConfigError::Read {
                    path: path.to_owned(),
                    source,
                };
                warn!("{err}");
                Self::default()
            }
        };
        if let Some(card) = render_card.filter(|card| !card.is_empty()) {
            config.render_card = PathBuf::from(card);
        }
        config
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::try_from(Self::default())?;
        let overrides = content.parse::<toml::Value>()?;
        merge_value(&mut merged, overrides);
        Ok(merged.try_into()?)
    }
}

fn merge_value(base: &mut toml::Value, overrides: toml::Value) {
    match (base, overrides) {
        (toml::Value::Table(base_map), toml::Value::Table(override_map)) => {
            for (key, override_value) in override_map {
                match base_map.entry(key) {
                    Entry::Occupied(mut entry) => merge_value(entry.get_mut(), override_value),
                    Entry::Vacant(entry) => {
                        entry.insert(override_value);
                    }
                }
            }
        }
        (base_value, override_value) => {
            *base_value = override_value;
        }
    }
}
