//! Client settings.
//!
//! Settings come from a plain `KEY=value` file read once at startup, layered
//! under `FEED__*` environment variables with the `config` crate. A missing
//! file leaves only the built-in defaults.

use crate::error::FeedError;
use config::{Map, Source, Value};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Base address used when no settings file provides one
pub const DEFAULT_API_BASE: &str = "http://localhost:7072/api";

/// Raw `KEY=value` settings, keys folded to lowercase
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    /// Parse settings text. Blank lines and `#` comments are skipped; the
    /// value is everything after the first `=`. Lines without `=` or with an
    /// empty key are ignored.
    pub fn parse(text: &str) -> Self {
        let values = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .filter(|(key, _)| !key.trim().is_empty())
            .map(|(key, value)| (key.trim().to_lowercase(), value.to_string()))
            .collect();

        Self { values }
    }

    pub fn load(path: &Path) -> Result<Self, FeedError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FeedError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Source for Settings {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
        let origin = "settings file".to_string();
        Ok(self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), Value::new(Some(&origin), v.clone())))
            .collect())
    }
}

/// Feed client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Base address of the media store API
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Viewport height used by the headless driver
    #[serde(default = "default_viewport_height")]
    pub viewport_height: f64,
    /// Visible fraction that starts playback
    #[serde(default = "default_primary_threshold")]
    pub primary_threshold: f64,
    /// Preload margin in viewport heights, above and below
    #[serde(default = "default_lazy_margin")]
    pub lazy_margin: f64,
    /// Items farther than this from the current one lose their source
    #[serde(default = "default_eviction_distance")]
    pub eviction_distance: usize,
    /// Show the bundled sample list when listing fails
    #[serde(default = "default_true")]
    pub demo_fallback: bool,
    /// How long upload status messages stay visible
    #[serde(default = "default_status_dismiss_ms")]
    pub status_dismiss_ms: u64,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_viewport_height() -> f64 {
    800.0
}

fn default_primary_threshold() -> f64 {
    0.8
}

fn default_lazy_margin() -> f64 {
    0.5
}

fn default_eviction_distance() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_status_dismiss_ms() -> u64 {
    3000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            viewport_height: default_viewport_height(),
            primary_threshold: default_primary_threshold(),
            lazy_margin: default_lazy_margin(),
            eviction_distance: default_eviction_distance(),
            demo_fallback: true,
            status_dismiss_ms: default_status_dismiss_ms(),
        }
    }
}

impl FeedConfig {
    /// Build from optional file settings plus `FEED__*` environment overrides
    pub fn from_settings(settings: Option<Settings>) -> Result<Self, FeedError> {
        let mut builder = config::Config::builder().set_default("api_base", DEFAULT_API_BASE)?;

        if let Some(settings) = settings {
            builder = builder.add_source(settings);
        }

        let config = builder
            // FEED__API_BASE -> api_base
            .add_source(
                config::Environment::with_prefix("FEED")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load the settings file at `path`, falling back to defaults when it
    /// cannot be read
    pub fn load(path: &Path) -> Result<Self, FeedError> {
        let settings = match Settings::load(path) {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!(error = %e, "Settings file unavailable, using defaults");
                None
            }
        };
        Self::from_settings(settings)
    }

    pub fn status_dismiss(&self) -> Duration {
        Duration::from_millis(self.status_dismiss_ms)
    }
}
