/// Startup configuration read from an optional TOML file
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::dispatcher::DEFAULT_TICK_PERIOD;
use crate::plugins::{PluginDirectory, PACKAGE_MARKER};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Windows opened by `launch`.
    pub count: u32,
    pub width: u32,
    pub height: u32,
    /// Horizontal offset between consecutive windows.
    pub x_offset: u32,
    /// Vertical offset between consecutive windows.
    pub y_offset: u32,
    pub borderless: bool,
    pub resizable: bool,
    /// Which window this process is. Drives pipeline visibility.
    pub index: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            count: 1,
            width: 600,
            height: 500,
            x_offset: 50,
            y_offset: 50,
            borderless: false,
            resizable: false,
            index: 0,
        }
    }
}

impl WindowConfig {
    pub fn position(&self) -> (u32, u32) {
        (self.index * self.x_offset, self.index * self.y_offset)
    }

    pub fn title(&self) -> String {
        let (x, y) = self.position();
        format!(
            "topicscene window {} ({}x{} at {x},{y})",
            self.index, self.width, self.height
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
        }
    }
}

impl BusConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub directories: Vec<PathBuf>,
    /// File names skipped in every plugin directory.
    pub exclude: Vec<String>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            exclude: vec![PACKAGE_MARKER.to_string()],
        }
    }
}

impl PluginConfig {
    pub fn plugin_directories(&self) -> Vec<PluginDirectory> {
        self.directories
            .iter()
            .map(|path| PluginDirectory::new(path).with_exclude(self.exclude.iter().cloned()))
            .collect()
    }
}

/// Every setting of one process.
///
/// Command line flags are laid over these values (see `cli.rs`). Every field
/// has a default so an empty file, or no file at all, is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub bus: BusConfig,
    pub plugins: PluginConfig,
    pub tick_ms: u64,
    /// Skip the terminal view and only log.
    pub headless: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            bus: BusConfig::default(),
            plugins: PluginConfig::default(),
            tick_ms: DEFAULT_TICK_PERIOD.as_millis() as u64,
            headless: false,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source)
    }

    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.tick_period(), Duration::from_millis(40));
        assert_eq!(config.bus.addr(), "localhost:8080");
        assert_eq!(config.plugins.exclude, vec!["mod.toml".to_string()]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::parse(
            r#"
            tick_ms = 25
            [window]
            index = 2
            [bus]
            port = 9000
            [plugins]
            directories = ["plugins", "more"]
            "#,
        )
        .unwrap();
        assert_eq!(config.window.index, 2);
        assert_eq!(config.window.width, 600);
        assert_eq!(config.window.position(), (100, 100));
        assert_eq!(config.bus.addr(), "localhost:9000");
        assert_eq!(config.tick_period(), Duration::from_millis(25));

        let dirs = config.plugins.plugin_directories();
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].exclude.contains("mod.toml"));
    }

    #[test]
    fn bad_types_are_rejected() {
        assert!(matches!(
            AppConfig::parse("[bus]\nport = \"eighty\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            AppConfig::load(Path::new("/definitely/not/here.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
