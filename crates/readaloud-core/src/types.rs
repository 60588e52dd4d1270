//! Shared types for the readaloud reader.
//!
//! These types are used across readaloud-lib, readaloud-cli, and the HTTP
//! control API. Keeping them in readaloud-core means consumers can depend on
//! them without pulling in tokio, rodio, or reqwest.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── Settings ──────────────────────────────────────────────────────────────

/// Default API base used until the settings store supplies a real one.
pub const DEFAULT_API_BASE: &str = "https://api.example.com/v1";
pub const DEFAULT_VOICE: &str = "af_jessica";
pub const DEFAULT_SPEED: f32 = 1.0;
/// Model sent to the speech endpoint when the settings leave it unset.
pub const DEFAULT_MODEL: &str = "kokoro";

/// Voices offered when `api.openai.com` is configured but no listing succeeds.
pub const OPENAI_VOICES: &[&str] = &[
    "alloy", "ash", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer",
];

/// TTS connection settings, persisted as camelCase JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsSettings {
    pub api_base: String,
    pub voice: String,
    pub speed: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            voice: DEFAULT_VOICE.into(),
            speed: DEFAULT_SPEED,
            api_key: None,
            model: None,
        }
    }
}

impl TtsSettings {
    /// Apply an update: non-empty incoming fields win, empty ones keep the
    /// current value. Speed is only taken when positive.
    pub fn merge_from(&mut self, update: &TtsSettings) {
        if !update.api_base.is_empty() {
            self.api_base = update.api_base.clone();
        }
        if !update.voice.is_empty() {
            self.voice = update.voice.clone();
        }
        if update.speed > 0.0 {
            self.speed = update.speed;
        }
        if let Some(key) = update.api_key.as_deref().filter(|k| !k.is_empty()) {
            self.api_key = Some(key.to_string());
        }
        if let Some(model) = update.model.as_deref().filter(|m| !m.is_empty()) {
            self.model = Some(model.to_string());
        }
    }

    /// Model name sent to the speech endpoint.
    pub fn model_or_default(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }

    /// Bearer token, if one is configured.
    pub fn bearer(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    /// API base without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }
}

/// Response shape of the voice listing endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoicesResponse {
    #[serde(default)]
    pub voices: Vec<String>,
}

// ─── Shared reader state ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Process-wide observable state: the session flag, theme, and settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReaderState {
    pub reading: bool,
    pub theme: Theme,
    pub settings: TtsSettings,
}

/// Keys a state listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Reading,
    Theme,
    Settings,
}

// ─── Pipeline configuration ────────────────────────────────────────────────

pub const DEFAULT_MIN_CHARS: usize = 50;
pub const DEFAULT_MAX_CHARS: usize = 100;
pub const MEM_LIMIT: usize = 100;
pub const EVICT_BATCH: usize = 5;
pub const MAX_RETRY_ATTEMPTS: u32 = 3;
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const SEGMENT_GAP: Duration = Duration::from_millis(500);
pub const PENDING_POLL: Duration = Duration::from_millis(100);

/// Tunables for segmentation, caching, fetching, and pacing.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    /// Maximum number of ready cache entries.
    pub cache_limit: usize,
    /// Entries evicted at once when the cache is full.
    pub evict_batch: usize,
    /// Total fetch attempts per segment before giving up.
    pub max_retry_attempts: u32,
    pub fetch_timeout: Duration,
    /// Pause inserted after every segment.
    pub segment_gap: Duration,
    /// Upper bound on how long a waiter sleeps between placeholder checks.
    pub pending_poll: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_chars: DEFAULT_MIN_CHARS,
            max_chars: DEFAULT_MAX_CHARS,
            cache_limit: MEM_LIMIT,
            evict_batch: EVICT_BATCH,
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            fetch_timeout: FETCH_TIMEOUT,
            segment_gap: SEGMENT_GAP,
            pending_poll: PENDING_POLL,
        }
    }
}

// ─── Status ────────────────────────────────────────────────────────────────

/// Fetch pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub cached: usize,
    pub pending: usize,
    pub queued: usize,
    pub in_flight: usize,
}

/// Reader status snapshot served by the control API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderStatus {
    pub reading: bool,
    pub session_active: bool,
    pub current_element: Option<usize>,
    pub theme: Theme,
    pub voice: String,
    pub speed: f32,
    pub queue: QueueStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_existing_on_empty_fields() {
        let mut current = TtsSettings {
            api_base: "http://tts.local/v1".into(),
            voice: "af_heart".into(),
            speed: 1.5,
            api_key: Some("secret".into()),
            model: Some("tts-1".into()),
        };
        current.merge_from(&TtsSettings {
            api_base: String::new(),
            voice: "am_adam".into(),
            speed: 0.0,
            api_key: Some(String::new()),
            model: None,
        });
        assert_eq!(current.api_base, "http://tts.local/v1");
        assert_eq!(current.voice, "am_adam");
        assert_eq!(current.speed, 1.5);
        assert_eq!(current.api_key.as_deref(), Some("secret"));
        assert_eq!(current.model.as_deref(), Some("tts-1"));
    }

    #[test]
    fn model_defaults_to_kokoro() {
        let s = TtsSettings::default();
        assert_eq!(s.model_or_default(), "kokoro");
        let s = TtsSettings {
            model: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(s.model_or_default(), "kokoro");
    }

    #[test]
    fn settings_json_is_camel_case() {
        let s = TtsSettings {
            api_key: Some("k".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["apiBase"], "https://api.example.com/v1");
        assert_eq!(json["apiKey"], "k");
        assert!(json.get("model").is_none());

        let parsed: TtsSettings =
            serde_json::from_str(r#"{"apiBase":"http://x","voice":"v","speed":2.0}"#).unwrap();
        assert_eq!(parsed.api_key, None);
        assert_eq!(parsed.speed, 2.0);
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let s = TtsSettings {
            api_base: "http://localhost:8880/v1/".into(),
            ..Default::default()
        };
        assert_eq!(s.base_url(), "http://localhost:8880/v1");
    }

    #[test]
    fn theme_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Theme::Dark).unwrap(), "\"dark\"");
    }
}
