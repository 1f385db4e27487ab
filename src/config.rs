//! Initial engine configuration.
//!
//! Hosts usually hand this over as JSON next to the plugin state. Every
//! field has a default, so a partial document is fine.

use crate::engine::constants::{
    DEFAULT_FFT_SIZE, DEFAULT_OVERLAP_FACTOR, DEFAULT_SAMPLE_RATE, DEFAULT_WINDOW_FUNCTION,
    DEFAULT_WINDOW_SIZE_FACTOR, MAX_CHANNELS,
};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::storage::StorageFactors;
use crate::engine::window::WindowFunction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fft_size: u16,
    pub overlap_factor: u8,
    pub window_size_factor: u8,
    pub window_function: WindowFunction,
    pub channels: u8,
    pub side_channels: u8,
    pub sample_rate: u32,
    /// Upper bound for the shared storage in bytes.
    pub storage_limit_bytes: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            overlap_factor: DEFAULT_OVERLAP_FACTOR,
            window_size_factor: DEFAULT_WINDOW_SIZE_FACTOR,
            window_function: DEFAULT_WINDOW_FUNCTION,
            channels: 2,
            side_channels: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            storage_limit_bytes: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn storage_factors(&self) -> StorageFactors {
        StorageFactors {
            fft_size: self.fft_size,
            window_size_factor: self.window_size_factor,
            overlap_factor: self.overlap_factor,
            number_of_channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }

    /// Rejects configuration errors before anything is allocated.
    pub fn validate(&self) -> EngineResult<()> {
        let factors = self.storage_factors();
        if !factors.is_complete() {
            if self.fft_size == 0 {
                return Err(EngineError::InvalidFftSize(0));
            }
            if self.overlap_factor == 0 {
                return Err(EngineError::InvalidOverlapFactor(0));
            }
            if self.window_size_factor == 0 {
                return Err(EngineError::InvalidWindowSizeFactor(0));
            }
            if self.sample_rate == 0 {
                return Err(EngineError::InvalidSampleRate(0));
            }
        }
        factors.validate()?;
        if self.channels == 0 || self.channels > MAX_CHANNELS || self.side_channels > self.channels
        {
            return Err(EngineError::InvalidChannelCount {
                main: self.channels,
                side: self.side_channels,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.storage_factors().is_complete());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            EngineConfig::from_json(r#"{ "fft_size": 2048, "window_function": "Blackman" }"#)
                .unwrap();
        assert_eq!(config.fft_size, 2048);
        assert_eq!(config.window_function, WindowFunction::Blackman);
        assert_eq!(config.overlap_factor, DEFAULT_OVERLAP_FACTOR);
        assert_eq!(config.storage_limit_bytes, None);
    }

    #[test]
    fn test_validation_errors() {
        let config = EngineConfig {
            fft_size: 3000,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(EngineError::InvalidFftSize(3000)));
        let config = EngineConfig {
            channels: 1,
            side_channels: 2,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(EngineError::InvalidChannelCount { main: 1, side: 2 })
        );
        let config = EngineConfig {
            channels: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
