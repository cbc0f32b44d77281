//! Configuration for the co-pilot
//!
//! Every section has working defaults, so an empty or missing file runs the
//! app against the public price mirrors with the built-in cue tones.

use crate::{Result, SolashenError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables checked for the assistant API key, in order
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Solashen, a concise voice co-pilot for a \
crypto trader watching SOL and BTC. Answer in one or two short spoken sentences.";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub realtime: RealtimeConfig,
    pub audio: AudioConfig,
    pub market: MarketConfig,
    pub cues: CueConfig,
}

/// Remote assistant connection
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    /// Falls back to the environment when unset
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Bound on connecting plus the setup handshake
    pub connect_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Kore".to_string(),
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            api_key: None,
            connect_timeout_secs: 15,
        }
    }
}

impl RealtimeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Whether to open the microphone and speakers
    pub enable_devices: bool,
    /// Samples per outbound microphone frame
    pub capture_frame_size: usize,
    /// Rate the built-in cue tones are rendered at
    pub cue_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enable_devices: true,
            capture_frame_size: 4096,
            cue_sample_rate: 24000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Interchangeable endpoints, tried in rotation
    pub mirrors: Vec<String>,
    /// Symbols every successful response must contain
    pub symbols: Vec<String>,
    /// Symbol whose moves trigger cues
    pub alert_symbol: String,
    /// Absolute price move that triggers a cue
    pub threshold: f64,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        let query = r#"ticker/price?symbols=["SOLUSDT","BTCUSDT"]"#;
        Self {
            mirrors: ["api", "api1", "api2", "api3"]
                .iter()
                .map(|host| format!("https://{}.binance.com/api/v3/{}", host, query))
                .collect(),
            symbols: vec!["SOLUSDT".to_string(), "BTCUSDT".to_string()],
            alert_symbol: "SOLUSDT".to_string(),
            threshold: 0.10,
            poll_interval_secs: 20,
            request_timeout_secs: 10,
        }
    }
}

impl MarketConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Optional WAV files replacing the built-in tones
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    pub alert: Option<PathBuf>,
    pub price_up: Option<PathBuf>,
    pub price_down: Option<PathBuf>,
}

impl AppConfig {
    /// Load from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SolashenError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| SolashenError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Fill the API key from the environment if the file did not set one
    pub fn with_env_api_key(mut self) -> Self {
        if self.realtime.api_key.as_deref().map_or(true, str::is_empty) {
            self.realtime.api_key = API_KEY_VARS
                .iter()
                .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()));
        }
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.realtime.api_key = Some(key.into());
        self
    }

    /// Run without microphone or speakers
    pub fn without_audio_devices(mut self) -> Self {
        self.audio.enable_devices = false;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.market.mirrors.is_empty() {
            return Err("At least one price mirror is required".to_string());
        }
        if self.market.symbols.is_empty() {
            return Err("At least one market symbol is required".to_string());
        }
        if !self.market.symbols.contains(&self.market.alert_symbol) {
            return Err(format!(
                "Alert symbol {} is not among the polled symbols",
                self.market.alert_symbol
            ));
        }
        if self.market.threshold.is_nan() || self.market.threshold <= 0.0 {
            return Err("Price threshold must be positive".to_string());
        }
        if self.market.poll_interval_secs == 0 {
            return Err("Poll interval must be at least one second".to_string());
        }
        if self.audio.capture_frame_size == 0 {
            return Err("Capture frame size must be greater than 0".to_string());
        }
        if self.audio.cue_sample_rate == 0 {
            return Err("Cue sample rate must be greater than 0".to_string());
        }
        if self.realtime.connect_timeout_secs == 0 {
            return Err("Connect timeout must be at least one second".to_string());
        }

        for path in [&self.cues.alert, &self.cues.price_up, &self.cues.price_down]
            .into_iter()
            .flatten()
        {
            if !path.exists() {
                return Err(format!("Cue file not found: {:?}", path));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.market.mirrors.len(), 4);
        assert!(config.market.mirrors[1].starts_with("https://api1.binance.com/"));
        assert_eq!(config.market.threshold, 0.10);
        assert_eq!(config.market.poll_interval(), Duration::from_secs(20));
        assert_eq!(config.realtime.voice, "Kore");
        assert!(config.audio.enable_devices);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [market]
            threshold = 0.5
            poll_interval_secs = 5

            [realtime]
            voice = "Puck"
            "#,
        )
        .unwrap();

        assert_eq!(config.market.threshold, 0.5);
        assert_eq!(config.market.poll_interval_secs, 5);
        assert_eq!(config.market.alert_symbol, "SOLUSDT");
        assert_eq!(config.realtime.voice, "Puck");
        assert_eq!(config.realtime.connect_timeout_secs, 15);
    }

    #[test]
    fn test_config_builder() {
        let config = AppConfig::default()
            .without_audio_devices()
            .with_api_key("secret");
        assert!(!config.audio.enable_devices);
        assert_eq!(config.realtime.api_key.as_deref(), Some("secret"));

        // An explicit key wins over the environment
        let config = config.with_env_api_key();
        assert_eq!(config.realtime.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.market.alert_symbol = "ETHUSDT".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.market.mirrors.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cues.alert = Some(PathBuf::from("/nonexistent/alert.wav"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(AppConfig::from_toml("[market\nthreshold = ").is_err());
        assert!(AppConfig::load("/nonexistent/solashen.toml").is_err());
    }
}
