//! Configuration management for AssayCam
//!
//! Provides configuration loading, saving, and validation for stream
//! readiness, frame encoding, the analysis endpoint and device handling.
//! Files are TOML; any key can be overridden from the environment as
//! `ASSAYCAM__<SECTION>__<KEY>`.

use crate::errors::CameraError;
use crate::types::Resolution;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssayCamConfig {
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
    pub analysis: AnalysisConfig,
    pub devices: DevicesConfig,
}

/// Stream acquisition and readiness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Requested resolution [width, height]; relaxed on over-constrained devices
    pub resolution: [u32; 2],
    /// How long a playing stream may go without decoded dimensions
    pub ready_timeout_ms: u64,
    pub ready_poll_ms: u64,
}

/// Still-frame encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// JPEG quality (1-100) for single captures
    pub jpeg_quality: u8,
    /// JPEG quality (1-100) for frames shipped to the analysis endpoint
    pub analysis_jpeg_quality: u8,
    /// Encoded payloads shorter than this are treated as empty
    pub min_payload_bytes: usize,
}

/// Purity analysis endpoint and polling cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub base_url: String,
    pub interval_ms: u64,
    /// Pause between the status reset and the first cycle
    pub start_delay_ms: u64,
    pub request_timeout_secs: u64,
}

/// Enumeration, hot-plug and preference persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Poll interval when the platform has no device-change notifications
    pub hotplug_poll_ms: u64,
    /// Run smart selection for empty roles when a device appears
    pub auto_select_on_hotplug: bool,
    pub preference_file: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            resolution: [640, 480],
            ready_timeout_ms: 5000,
            ready_poll_ms: 50,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            analysis_jpeg_quality: 60,
            min_payload_bytes: 100,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            interval_ms: 500,
            start_delay_ms: 100,
            request_timeout_secs: 10,
        }
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            hotplug_poll_ms: 2000,
            auto_select_on_hotplug: false,
            preference_file: "assaycam-preferences.toml".to_string(),
        }
    }
}

impl CameraConfig {
    pub fn requested_resolution(&self) -> Resolution {
        Resolution::new(self.resolution[0], self.resolution[1])
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }
}

impl AnalysisConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

impl DevicesConfig {
    pub fn hotplug_poll(&self) -> Duration {
        Duration::from_millis(self.hotplug_poll_ms)
    }
}

impl AssayCamConfig {
    /// Load configuration from a TOML file layered with environment overrides.
    ///
    /// A missing file is not an error; defaults fill every absent key.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("ASSAYCAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AssayCamConfig = settings.try_deserialize()?;
        config.validate().map_err(CameraError::Config)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CameraError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CameraError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("assaycam.toml")
    }

    /// Load from default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.resolution[0] == 0 || self.camera.resolution[1] == 0 {
            return Err("Invalid resolution".to_string());
        }
        if self.camera.ready_timeout_ms == 0 {
            return Err("Readiness timeout must be positive".to_string());
        }
        if self.camera.ready_poll_ms == 0 || self.camera.ready_poll_ms > self.camera.ready_timeout_ms
        {
            return Err("Readiness poll must be between 1 ms and the readiness timeout".to_string());
        }

        for quality in [self.capture.jpeg_quality, self.capture.analysis_jpeg_quality] {
            if quality == 0 || quality > 100 {
                return Err("JPEG quality must be between 1 and 100".to_string());
            }
        }

        if !self.analysis.base_url.starts_with("http://")
            && !self.analysis.base_url.starts_with("https://")
        {
            return Err("Analysis base URL must be http(s)".to_string());
        }
        if self.analysis.interval_ms == 0 {
            return Err("Analysis interval must be positive".to_string());
        }
        if self.analysis.request_timeout_secs == 0 {
            return Err("Analysis request timeout must be positive".to_string());
        }

        if self.devices.hotplug_poll_ms == 0 {
            return Err("Hot-plug poll interval must be positive".to_string());
        }
        if self.devices.preference_file.trim().is_empty() {
            return Err("Preference file path is empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AssayCamConfig::default();
        assert_eq!(config.camera.resolution, [640, 480]);
        assert_eq!(config.camera.ready_timeout_ms, 5000);
        assert_eq!(config.capture.analysis_jpeg_quality, 60);
        assert_eq!(config.analysis.interval_ms, 500);
        assert!(!config.devices.auto_select_on_hotplug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = AssayCamConfig::default();
        bad.camera.resolution = [0, 0];
        assert!(bad.validate().is_err());

        let mut bad = AssayCamConfig::default();
        bad.capture.jpeg_quality = 0;
        assert!(bad.validate().is_err());

        let mut bad = AssayCamConfig::default();
        bad.analysis.base_url = "localhost:8000".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("assaycam.toml");

        let mut config = AssayCamConfig::default();
        config.analysis.interval_ms = 750;
        config.capture.jpeg_quality = 85;
        config.save_to_file(&config_path).unwrap();

        let loaded = AssayCamConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.analysis.interval_ms, 750);
        assert_eq!(loaded.capture.jpeg_quality, 85);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("partial.toml");
        fs::write(&config_path, "[analysis]\nbase_url = \"http://10.0.0.5:8000\"\n").unwrap();

        let loaded = AssayCamConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.analysis.base_url, "http://10.0.0.5:8000");
        assert_eq!(loaded.analysis.interval_ms, 500);
        assert_eq!(loaded.camera, CameraConfig::default());
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("ASSAYCAM__DEVICES__HOTPLUG_POLL_MS", "1500");
        let loaded = AssayCamConfig::load_from_file("nonexistent_assaycam.toml").unwrap();
        std::env::remove_var("ASSAYCAM__DEVICES__HOTPLUG_POLL_MS");
        assert_eq!(loaded.devices.hotplug_poll_ms, 1500);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&AssayCamConfig::default()).unwrap();
        assert!(toml_string.contains("[camera]"));
        assert!(toml_string.contains("[capture]"));
        assert!(toml_string.contains("[analysis]"));
        assert!(toml_string.contains("[devices]"));
        assert!(toml_string.contains("ready_timeout_ms"));
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("bad.toml");
        fs::write(&config_path, "[capture]\njpeg_quality = 0\n").unwrap();
        assert!(matches!(
            AssayCamConfig::load_from_file(&config_path),
            Err(CameraError::Config(_))
        ));
    }
}
