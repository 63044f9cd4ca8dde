use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::renderer::RendererOptions;
use crate::transport::{AUTH_KEY_HEADER, Metadata};

/// Windowing tunables for list views
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct WindowConfig {
    /// Height assumed for items that were never measured
    #[serde(default = "default_item_height")]
    pub default_item_height: f64,

    /// Extra distance rendered above and below the viewport
    #[serde(default)]
    pub overscan: f64,

    /// Scroll events closer together than this are coalesced
    #[serde(default = "default_scroll_debounce")]
    pub scroll_debounce_ms: u64,
}

fn default_item_height() -> f64 {
    100.0
}
fn default_scroll_debounce() -> u64 {
    16
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            default_item_height: default_item_height(),
            overscan: 0.0,
            scroll_debounce_ms: default_scroll_debounce(),
        }
    }
}

impl WindowConfig {
    pub fn renderer_options(&self) -> RendererOptions {
        RendererOptions {
            default_height: self.default_item_height,
            overscan: self.overscan,
            scroll_debounce: Duration::from_millis(self.scroll_debounce_ms),
        }
    }
}

/// Root configuration file structure
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ClientConfig {
    /// Controller API endpoint
    pub controller_host: String,

    /// Sent as `Auth-Key` metadata on every call
    #[serde(default)]
    pub auth_key: Option<String>,

    #[serde(default)]
    pub window: WindowConfig,
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid { field: &'static str, reason: String },
    NotFound { searched: Vec<PathBuf> },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Yaml(e) => write!(f, "YAML parse error: {}", e),
            Self::Invalid { field, reason } => write!(f, "invalid '{}': {}", field, reason),
            Self::NotFound { searched } => {
                write!(f, "no config file found, searched: {:?}", searched)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e)
    }
}

impl ClientConfig {
    pub fn new(controller_host: impl Into<String>) -> Self {
        Self {
            controller_host: controller_host.into(),
            auth_key: None,
            window: WindowConfig::default(),
        }
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search for config file in standard locations
    pub fn discover(start_dir: &Path) -> Result<(PathBuf, Self), ConfigError> {
        let names = ["ctrlview.yaml", "ctrlview.yml", ".ctrlview.yaml", ".ctrlview.yml"];
        let mut searched = Vec::new();

        // Check environment variable first
        if let Ok(env_path) = std::env::var("CTRLVIEW_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok((path.clone(), Self::load(&path)?));
            }
            searched.push(path);
        }

        // Search current directory and parents
        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            for name in &names {
                let path = current.join(name);
                if path.exists() {
                    return Ok((path.clone(), Self::load(&path)?));
                }
                searched.push(path);
            }
            dir = current.parent();
        }

        Err(ConfigError::NotFound { searched })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller_host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "controller_host",
                reason: "must not be empty".into(),
            });
        }
        let height = self.window.default_item_height;
        if !height.is_finite() || height <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "window.default_item_height",
                reason: format!("must be a positive number, got {}", height),
            });
        }
        let overscan = self.window.overscan;
        if !overscan.is_finite() || overscan < 0.0 {
            return Err(ConfigError::Invalid {
                field: "window.overscan",
                reason: format!("must not be negative, got {}", overscan),
            });
        }
        Ok(())
    }

    /// Request metadata derived from this configuration
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        if let Some(key) = self.auth_key.as_deref().filter(|k| !k.is_empty()) {
            metadata.insert(AUTH_KEY_HEADER.to_string(), key.to_string());
        }
        metadata
    }
}
