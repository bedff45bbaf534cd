//! Clock configuration and generic config I/O
//!
//! Provides the serializable clock settings plus generic YAML loading and
//! saving that works with any serializable configuration type.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::clock::MonotonicClock;
use crate::interpolator::StreamClock;
use crate::types::{Usecs, DEFAULT_AUDIO_LATENCY};

/// Settings for a stream clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// End-to-end FIFO latency in microseconds
    ///
    /// Should be at least the real latency from a write entering the FIFO
    /// to it being rendered; values <= 0 fall back to the default when
    /// applied.
    pub latency_usecs: Usecs,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            latency_usecs: DEFAULT_AUDIO_LATENCY,
        }
    }
}

impl ClockConfig {
    /// Set the latency in microseconds
    pub fn with_latency(mut self, usecs: Usecs) -> Self {
        self.latency_usecs = usecs;
        self
    }

    /// Apply these settings to a clock
    pub fn apply_to<C: MonotonicClock>(&self, clock: &StreamClock<C>) {
        clock.set_latency(self.latency_usecs);
    }
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns the default config. If the file
/// exists but is invalid, logs a warning and returns the default config.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => {
                log::info!("load_config: Successfully loaded config from {:?}", path);
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using defaults", e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!(
                "load_config: Failed to read config file: {}, using defaults",
                e
            );
            T::default()
        }
    }
}

/// Save configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Config saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: ClockConfig = load_config(Path::new("/nonexistent/path/config.yaml"));
        assert_eq!(config, ClockConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock.yaml");

        let config = ClockConfig::default().with_latency(80_000);
        save_config(&config, &path).unwrap();
        let loaded: ClockConfig = load_config(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_apply_falls_back_on_non_positive_latency() {
        let clock = StreamClock::with_clock(ManualClock::new());
        ClockConfig::default().with_latency(-1).apply_to(&clock);
        assert_eq!(clock.latency(), DEFAULT_AUDIO_LATENCY);

        ClockConfig::default().with_latency(80_000).apply_to(&clock);
        assert_eq!(clock.latency(), 80_000);
    }
}
