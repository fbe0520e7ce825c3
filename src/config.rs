//! Engine configuration
//!
//! Timing and buffering knobs that are fixed for the lifetime of an
//! [`EngineHandle`](crate::engine::EngineHandle). Musical settings live in
//! [`SynthParams`](crate::params::SynthParams) instead.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of the silence ramp applied to every gain on stop
    pub stop_ramp_ms: u64,
    /// Delay between the silence ramp and releasing the device
    pub grace_period_ms: u64,
    /// Smoothing factor for telemetry samples
    pub ema_alpha: f64,
    /// Capacity of the control → render command channel
    pub command_capacity: usize,
    /// Frames per captured block
    pub capture_block_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_ramp_ms: 100,
            grace_period_ms: 2000,
            ema_alpha: 0.12,
            command_capacity: 4096,
            capture_block_frames: 128,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Params(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.capture_block_frames == 0 || self.command_capacity == 0 {
            return Err(EngineError::Params(
                "capture block size and channel capacity must be non-zero".into(),
            ));
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(EngineError::Params(format!(
                "ema_alpha must be in (0, 1], got {}",
                self.ema_alpha
            )));
        }
        if self.stop_ramp_ms > self.grace_period_ms {
            return Err(EngineError::Params(
                "stop ramp must finish before the grace period ends".into(),
            ));
        }
        Ok(())
    }

    pub fn stop_ramp(&self) -> Duration {
        Duration::from_millis(self.stop_ramp_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.stop_ramp(), Duration::from_millis(100));
        assert_eq!(config.grace_period(), Duration::from_millis(2000));
        assert_eq!(config.capture_block_frames, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let config = EngineConfig::from_json(r#"{"ema_alpha": 0.5}"#).unwrap();
        assert_eq!(config.ema_alpha, 0.5);
        assert_eq!(config.grace_period_ms, 2000);

        assert!(EngineConfig::from_json(r#"{"ema_alpha": 0.0}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"stop_ramp_ms": 5000}"#).is_err());
    }
}
