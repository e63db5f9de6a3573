//! Session configuration for the feedback loop.
//!
//! Stored as JSON. Every field has a default, so a config file only needs to
//! list what differs from the standard Z piezo setup:
//!
//! ```json
//! {
//!   "window_length": 16,
//!   "limits": { "low": 0.1, "high": 0.9 },
//!   "pid": { "set_point": 0.002, "kp": 500.0, "ki": 50.0, "kd": 4000.0 }
//! }
//! ```

use std::path::Path;

use rpu_proto::{compute_scale, OutputLimits, ACCUMULATOR_MAX};
use serde::{Deserialize, Serialize};

use crate::error::{FeedbackError, FeedbackResult};
use crate::pid::PidParams;

/// Z bias output limits as stored in config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub low: f32,
    pub high: f32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            low: 0.0,
            high: 1.0,
        }
    }
}

/// Normalized X/Y scanner bias as stored in config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub x: f32,
    pub y: f32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { x: 0.5, y: 0.5 }
    }
}

/// Everything needed to program and monitor one feedback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Number of raw pixels in the RPU sliding sum (NSW)
    pub window_length: u64,
    /// ADC samples integrated per pixel
    pub samples_per_pixel: u64,
    /// Lock-in input port whose pixels are cross-checked
    pub input_channel: u8,
    pub limits: LimitsConfig,
    pub pid: PidParams,
    pub scanner: ScannerConfig,
    /// Status polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            window_length: 16,
            samples_per_pixel: 1000,
            input_channel: 1,
            limits: LimitsConfig::default(),
            pid: PidParams::default(),
            scanner: ScannerConfig::default(),
            poll_interval_ms: 1000,
        }
    }
}

impl FeedbackConfig {
    /// Load a config from a JSON file.
    pub fn load(path: &Path) -> FeedbackResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FeedbackError::Config(format!("reading {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| FeedbackError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> FeedbackResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| FeedbackError::Config(format!("serializing config: {e}")))?;
        std::fs::write(path, text)
            .map_err(|e| FeedbackError::Config(format!("writing {}: {e}", path.display())))
    }

    /// Apply the same checks the parameter store applies, without touching a device.
    pub fn validate(&self) -> FeedbackResult<()> {
        compute_scale(ACCUMULATOR_MAX, self.samples_per_pixel, self.window_length)?;
        OutputLimits::new(self.limits.low, self.limits.high)?;

        if let Some(name) = self.pid.first_non_finite() {
            return Err(FeedbackError::Domain(format!(
                "PID parameter {name} must be finite"
            )));
        }
        for (axis, value) in [("x", self.scanner.x), ("y", self.scanner.y)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FeedbackError::Domain(format!(
                    "scanner {axis} bias {value} outside [0.0, 1.0]"
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(FeedbackError::Config(
                "poll_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        FeedbackConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FeedbackConfig =
            serde_json::from_str(r#"{ "window_length": 32, "limits": { "low": 0.1, "high": 0.9 } }"#)
                .unwrap();
        assert_eq!(config.window_length, 32);
        assert_eq!(config.limits, LimitsConfig { low: 0.1, high: 0.9 });
        assert_eq!(config.pid, PidParams::default());
        assert_eq!(config.samples_per_pixel, 1000);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feedback.json");

        let mut config = FeedbackConfig::default();
        config.pid = PidParams::new(0.002, 500.0, 50.0, 4000.0);
        config.input_channel = 2;
        config.save(&path).unwrap();

        assert_eq!(FeedbackConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_invalid_limits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "limits": { "low": 0.8, "high": 0.2 } }"#).unwrap();

        assert!(matches!(
            FeedbackConfig::load(&path),
            Err(FeedbackError::InvalidLimits { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            FeedbackConfig::load(&dir.path().join("nope.json")),
            Err(FeedbackError::Config(_))
        ));
    }

    #[test]
    fn test_zero_window_is_domain_error() {
        let config = FeedbackConfig {
            window_length: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(FeedbackError::Domain(_))));
    }
}
