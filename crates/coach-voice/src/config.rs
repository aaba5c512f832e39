//! Engine configuration: built-in defaults, an optional TOML file, then environment.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | COACH_CONFIG | config/coach | Config file path (extension optional). |
//! | COACH_SERVICE_URL | local interview-coach function | Coaching service endpoint. |
//! | COACH_API_KEY | (empty) | Bearer token sent with every submission. |
//! | COACH_REQUEST_TIMEOUT_SECS | 60 | Whole-request timeout, stream included. |
//! | COACH_CAPTURE_LOCALE | en-US | Recognition locale. |
//! | COACH_VOICE__TARGET_LOCALE | en-GB | Locale the voice policy looks for. |
//! | COACH_VOICE__PREFERRED_MARKERS | Daniel,Male | Tier-1 voice name markers. |
//! | COACH_MIN_UTTERANCE_CHARS | 2 | Captures this short (trimmed) are noise. |

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/coach";

fn default_opening_message() -> String {
    "Hello! I'm ready to practice interviewing.".to_string()
}

fn default_fallback_message() -> String {
    "I'm sorry, I had trouble processing that. Could you try again?".to_string()
}

/// Voice selection and utterance settings for speech output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Exact locale tiers 1–3 match against; tier 4 matches it as a prefix.
    pub target_locale: String,
    /// Tier 1: any of these in the voice name (with the target locale).
    pub preferred_markers: Vec<String>,
    /// Tier 2: platform default voice name marker (with the target locale).
    pub platform_marker: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            target_locale: "en-GB".to_string(),
            preferred_markers: vec!["Daniel".to_string(), "Male".to_string()],
            platform_marker: "Google UK English Male".to_string(),
            rate: 0.95,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

/// Configuration for one conversation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Coaching service endpoint (POST, streamed response).
    pub service_url: String,
    /// Bearer token for the coaching service.
    #[serde(default)]
    pub api_key: String,
    pub request_timeout_secs: u64,
    /// Locale the recognition engine is configured for.
    pub capture_locale: String,
    pub voice: VoiceConfig,
    /// Trimmed captures with this many characters or fewer are discarded.
    pub min_utterance_chars: usize,
    #[serde(default = "default_opening_message")]
    pub opening_message: String,
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:54321/functions/v1/interview-coach".to_string(),
            api_key: String::new(),
            request_timeout_secs: 60,
            capture_locale: "en-US".to_string(),
            voice: VoiceConfig::default(),
            min_utterance_chars: 2,
            opening_message: default_opening_message(),
            fallback_message: default_fallback_message(),
        }
    }
}

impl EngineConfig {
    /// Load from `COACH_CONFIG` (or `config/coach`) and the `COACH_*` environment.
    pub fn load() -> VoiceResult<Self> {
        let path = std::env::var("COACH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Some(Path::new(&path)))
    }

    /// Load with an explicit file (missing files are skipped), then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> VoiceResult<Self> {
        let defaults = config::Config::try_from(&EngineConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            let name = path.to_string_lossy();
            builder = builder.add_source(config::File::with_name(&name).required(false));
        }

        let built = builder
            .add_source(
                config::Environment::with_prefix("COACH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("voice.preferred_markers"),
            )
            .build()?;

        let config: EngineConfig = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engines cannot honor.
    pub fn validate(&self) -> VoiceResult<()> {
        let url = self.service_url.trim();
        if url.is_empty() {
            return Err(VoiceError::Config("service_url is empty".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(VoiceError::Config(format!(
                "service_url must be http(s): {}",
                url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(VoiceError::Config("request_timeout_secs must be > 0".to_string()));
        }
        if !(0.1..=10.0).contains(&self.voice.rate) {
            return Err(VoiceError::Config(format!(
                "voice.rate must be between 0.1 and 10.0, got {}",
                self.voice.rate
            )));
        }
        if !(0.0..=2.0).contains(&self.voice.pitch) {
            return Err(VoiceError::Config(format!(
                "voice.pitch must be between 0.0 and 2.0, got {}",
                self.voice.pitch
            )));
        }
        if !(0.0..=1.0).contains(&self.voice.volume) {
            return Err(VoiceError::Config(format!(
                "voice.volume must be between 0.0 and 1.0, got {}",
                self.voice.volume
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
