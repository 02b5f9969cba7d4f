use serde::Deserialize;
use uuid::Uuid;

/// Runtime configuration, loaded from a TOML file at startup.
///
/// Every field has a default so a missing file or a partial file still
/// yields a usable config.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// WebSocket endpoint of the translation service.
    pub ws_url: String,
    /// Bearer token sent in the Authorization header.
    pub ws_token: String,
    /// Per-client identity sent in the Client-Id header. Generated when empty.
    pub client_id: String,

    /// Language spoken into the microphone.
    pub source_lang: String,
    /// Language the service should speak back.
    pub target_lang: String,

    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,

    /// Sample rate of outbound frames on the wire.
    pub capture_sample_rate: u32,
    /// Sample rate of inbound audio from the service.
    pub playback_sample_rate: u32,
    /// Outbound frame length in samples at `capture_sample_rate`.
    /// 960 samples at 16 kHz is a 60 ms frame period.
    pub frame_samples: usize,
    /// Desired ALSA capture channel count (downmixed to mono on the wire).
    pub capture_channels: u32,
    /// Desired ALSA playback channel count.
    pub playback_channels: u32,
    /// Desired ALSA playback period size in frames (0 = let ALSA decide).
    pub playback_period_size: usize,
    /// AGC target level for capture gain normalization.
    pub agc_level: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "wss://translate.example.net/v1/session".to_string(),
            ws_token: String::new(),
            client_id: String::new(),
            source_lang: "en".to_string(),
            target_lang: "es".to_string(),
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            capture_sample_rate: 16000,
            playback_sample_rate: 24000,
            frame_samples: 960,
            capture_channels: 1,
            playback_channels: 2,
            playback_period_size: 1024,
            agc_level: 24000.0,
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str::<Config>(&text)?,
            Err(_) => {
                log::info!("Config file {} not found, using defaults", path);
                Config::default()
            }
        };
        if config.client_id.is_empty() {
            config.client_id = Uuid::new_v4().to_string();
            log::info!("Generated Client ID: {}", config.client_id);
        }
        Ok(config)
    }

    /// Outbound frame period in seconds (frame length over wire rate).
    pub fn frame_period(&self) -> f64 {
        self.frame_samples as f64 / self.capture_sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config =
            toml::from_str(r#"ws_url = "wss://host/session""#).unwrap();
        assert_eq!(config.ws_url, "wss://host/session");
        assert_eq!(config.capture_sample_rate, 16000);
        assert_eq!(config.frame_samples, 960);
    }

    #[test]
    fn frame_period_matches_rate() {
        let config = Config::default();
        assert!((config.frame_period() - 0.06).abs() < 1e-9);
    }
}
