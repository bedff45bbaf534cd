//! Player configuration
//!
//! Loaded from YAML with the shared config helpers; every field has a
//! sensible default so a missing or partial file still produces a working
//! setup.

use serde::{Deserialize, Serialize};

use cadence_core::Usecs;

/// Default tone frequency for the demo signal (concert A)
pub const DEFAULT_TONE_HZ: f32 = 440.0;

/// Configuration for the player host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Output device name as reported by the system (None = default device)
    #[serde(default)]
    pub device: Option<String>,

    /// Preferred sample rate (None = device default)
    #[serde(default)]
    pub sample_rate: Option<u32>,

    /// Fixed buffer size in frames (None = device default)
    #[serde(default)]
    pub buffer_frames: Option<u32>,

    /// Override for the stream-clock latency in microseconds
    ///
    /// None picks a conservative value from the negotiated buffer size.
    #[serde(default)]
    pub latency_usecs: Option<Usecs>,

    /// Frequency of the demo tone in Hz
    #[serde(default = "default_tone_hz")]
    pub tone_hz: f32,
}

fn default_tone_hz() -> f32 {
    DEFAULT_TONE_HZ
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: None,
            buffer_frames: None,
            latency_usecs: None,
            tone_hz: DEFAULT_TONE_HZ,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert!(config.device.is_none());
        assert!(config.latency_usecs.is_none());
        assert_eq!(config.tone_hz, DEFAULT_TONE_HZ);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: PlayerConfig = serde_yaml::from_str("tone_hz: 220.0\n").unwrap();
        assert_eq!(config.tone_hz, 220.0);
        assert!(config.device.is_none());
        assert!(config.buffer_frames.is_none());
    }
}
